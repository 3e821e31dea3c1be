/// Parses a standard `bytes=<start>-<end?>` range header against a known
/// total size. Returns `None` when the header is unparseable or the
/// resulting range falls outside `[0, total_size)` — both map to a 416
/// response.
pub fn parse_byte_range(range_header: &str, total_size: u64) -> Option<(u64, u64)> {
    let spec = range_header.strip_prefix("bytes=")?;
    // Only single-range requests are served; a list ("a-b,c-d") is treated
    // as unparseable rather than guessing which sub-range the caller wants.
    if spec.contains(',') {
        return None;
    }
    let (start_str, end_str) = spec.split_once('-')?;

    let start = if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().ok()?;
        total_size.saturating_sub(suffix_len)
    } else {
        start_str.parse().ok()?
    };

    let end = if end_str.is_empty() {
        total_size.saturating_sub(1)
    } else if start_str.is_empty() {
        // suffix form already consumed end_str as the suffix length
        total_size.saturating_sub(1)
    } else {
        end_str.parse::<u64>().ok()?.min(total_size.saturating_sub(1))
    };

    if total_size == 0 || start > end || start >= total_size {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_range() {
        assert_eq!(parse_byte_range("bytes=0-99", 1000), Some((0, 99)));
    }

    #[test]
    fn parses_open_ended_range() {
        assert_eq!(parse_byte_range("bytes=500-", 1000), Some((500, 999)));
    }

    #[test]
    fn parses_suffix_range() {
        assert_eq!(parse_byte_range("bytes=-100", 1000), Some((900, 999)));
    }

    #[test]
    fn clamps_end_past_total_size() {
        assert_eq!(parse_byte_range("bytes=0-999999", 1000), Some((0, 999)));
    }

    #[test]
    fn rejects_start_past_total_size() {
        assert_eq!(parse_byte_range("bytes=1000-1001", 1000), None);
    }

    #[test]
    fn rejects_malformed_header() {
        assert_eq!(parse_byte_range("not-a-range", 1000), None);
        assert_eq!(parse_byte_range("bytes=abc-def", 1000), None);
    }
}
