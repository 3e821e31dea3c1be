//! XLF (XML Layout Format) parsing. Kept as a pure `&str -> XlfLayout`
//! function, entirely separate from the DOM-facing renderer, so layout
//! parsing is testable without a `DomSink` at all.

use roxmltree::Document;

use signage_contracts::ids::{LayoutId, RegionId, WidgetId};

use crate::error::{RenderError, RenderResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetKind {
    Video,
    Image,
    Audio,
    Pdf,
    Text,
    Ticker,
    Webpage,
    Clock,
    Weather,
    Calendar,
    /// Anything the CMS renders server-side into HTML the player embeds
    /// in an `<iframe>` (mirrors `getWidgetHtml`).
    GenericHtml,
}

impl WidgetKind {
    fn from_xlf_type(raw: &str) -> Self {
        match raw {
            "video" => WidgetKind::Video,
            "image" => WidgetKind::Image,
            "audio" => WidgetKind::Audio,
            "pdf" => WidgetKind::Pdf,
            "text" => WidgetKind::Text,
            "ticker" => WidgetKind::Ticker,
            "webpage" => WidgetKind::Webpage,
            "clock" => WidgetKind::Clock,
            "weather" => WidgetKind::Weather,
            "calendar" => WidgetKind::Calendar,
            _ => WidgetKind::GenericHtml,
        }
    }

    /// Widgets whose on-screen element is a `<video>`/`<audio>` the
    /// layout-identity replay path must restart unconditionally.
    pub fn is_media_element(&self) -> bool {
        matches!(self, WidgetKind::Video | WidgetKind::Audio)
    }

    /// Widgets rendered via a cache-stored HTML payload behind an
    /// `<iframe>` rather than a native element.
    pub fn is_html_widget(&self) -> bool {
        matches!(
            self,
            WidgetKind::Ticker
                | WidgetKind::Webpage
                | WidgetKind::Clock
                | WidgetKind::Weather
                | WidgetKind::Calendar
                | WidgetKind::GenericHtml
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    FadeIn,
    FadeOut,
    FlyIn(Direction),
    FlyOut(Direction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    fn from_str(raw: &str) -> Option<Self> {
        Some(match raw {
            "N" => Direction::North,
            "NE" => Direction::NorthEast,
            "E" => Direction::East,
            "SE" => Direction::SouthEast,
            "S" => Direction::South,
            "SW" => Direction::SouthWest,
            "W" => Direction::West,
            "NW" => Direction::NorthWest,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub kind: TransitionKind,
    pub duration_ms: u32,
}

#[derive(Debug, Clone)]
pub struct XlfWidget {
    pub id: WidgetId,
    pub kind: WidgetKind,
    pub media_id: Option<signage_contracts::ids::MediaId>,
    pub duration_ms: u32,
    pub use_duration: bool,
    pub transitions: Vec<Transition>,
}

impl XlfWidget {
    /// The transition to run when this widget first appears on screen.
    pub fn in_transition(&self) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| matches!(t.kind, TransitionKind::FadeIn | TransitionKind::FlyIn(_)))
    }

    /// The transition to run as this widget is hidden or its region is
    /// cleared.
    pub fn out_transition(&self) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| matches!(t.kind, TransitionKind::FadeOut | TransitionKind::FlyOut(_)))
    }
}

#[derive(Debug, Clone)]
pub struct XlfRegion {
    pub id: RegionId,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub loop_region: bool,
    pub widgets: Vec<XlfWidget>,
}

#[derive(Debug, Clone)]
pub struct XlfLayout {
    pub id: LayoutId,
    pub width: u32,
    pub height: u32,
    /// Total on-screen duration, when the CMS declares one. `None` means
    /// the layout plays indefinitely until the orchestrator picks another.
    pub duration_ms: Option<u32>,
    pub regions: Vec<XlfRegion>,
}

/// Parses a layout's XLF document. Pure function: no I/O, no DOM access.
pub fn parse_xlf(xml: &str, layout_id: LayoutId) -> RenderResult<XlfLayout> {
    let doc = Document::parse(xml).map_err(|e| RenderError::Parse(e.to_string()))?;
    let root = doc
        .descendants()
        .find(|n| n.has_tag_name("layout"))
        .ok_or_else(|| RenderError::Parse("missing <layout> element".to_string()))?;

    let width = attr_u32(&root, "width").unwrap_or(1920);
    let height = attr_u32(&root, "height").unwrap_or(1080);

    let regions = root
        .children()
        .filter(|n| n.has_tag_name("region"))
        .map(parse_region)
        .collect::<RenderResult<Vec<_>>>()?;

    Ok(XlfLayout {
        id: layout_id,
        width,
        height,
        duration_ms: attr_u32(&root, "duration").map(|s| s * 1000),
        regions,
    })
}

fn parse_region(node: roxmltree::Node) -> RenderResult<XlfRegion> {
    let id = node
        .attribute("id")
        .ok_or_else(|| RenderError::Parse("region missing id".to_string()))?;

    let widgets = node
        .children()
        .filter(|n| n.has_tag_name("media"))
        .map(parse_widget)
        .collect::<RenderResult<Vec<_>>>()?;

    Ok(XlfRegion {
        id: RegionId::new(id),
        x: attr_i32(&node, "left").unwrap_or(0),
        y: attr_i32(&node, "top").unwrap_or(0),
        width: attr_u32(&node, "width").unwrap_or(0),
        height: attr_u32(&node, "height").unwrap_or(0),
        loop_region: node.attribute("loop") == Some("1"),
        widgets,
    })
}

fn parse_widget(node: roxmltree::Node) -> RenderResult<XlfWidget> {
    let id = node
        .attribute("id")
        .ok_or_else(|| RenderError::Parse("widget missing id".to_string()))?;
    let raw_type = node.attribute("type").unwrap_or("");

    let transitions = node
        .children()
        .filter(|n| n.has_tag_name("transitions"))
        .flat_map(|t| t.children())
        .filter_map(|t| parse_transition(&t))
        .collect();

    Ok(XlfWidget {
        id: WidgetId::new(id),
        kind: WidgetKind::from_xlf_type(raw_type),
        media_id: node
            .attribute("mediaId")
            .map(signage_contracts::ids::MediaId::new),
        duration_ms: attr_u32(&node, "duration").unwrap_or(0) * 1000,
        use_duration: node.attribute("useDuration") != Some("0"),
        transitions,
    })
}

fn parse_transition(node: &roxmltree::Node) -> Option<Transition> {
    let direction = node.attribute("direction").and_then(Direction::from_str);
    let duration_ms = attr_u32(node, "duration").unwrap_or(0);
    let kind = match node.tag_name().name() {
        "fadeIn" => TransitionKind::FadeIn,
        "fadeOut" => TransitionKind::FadeOut,
        "flyIn" => TransitionKind::FlyIn(direction?),
        "flyOut" => TransitionKind::FlyOut(direction?),
        _ => return None,
    };
    Some(Transition { kind, duration_ms })
}

fn attr_u32(node: &roxmltree::Node, name: &str) -> Option<u32> {
    node.attribute(name).and_then(|v| v.parse().ok())
}

fn attr_i32(node: &roxmltree::Node, name: &str) -> Option<i32> {
    node.attribute(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <layout width="1920" height="1080">
          <region id="r1" left="0" top="0" width="1920" height="1080">
            <media id="w1" type="video" mediaId="m1" duration="10" useDuration="1">
              <transitions>
                <fadeIn duration="500" />
                <flyOut duration="300" direction="N" />
              </transitions>
            </media>
            <media id="w2" type="image" mediaId="m2" duration="5" />
          </region>
        </layout>
    "#;

    #[test]
    fn parses_regions_and_widgets_in_order() {
        let layout = parse_xlf(SAMPLE, LayoutId::new("l1")).unwrap();
        assert_eq!(layout.regions.len(), 1);
        let region = &layout.regions[0];
        assert_eq!(region.widgets.len(), 2);
        assert_eq!(region.widgets[0].kind, WidgetKind::Video);
        assert_eq!(region.widgets[0].duration_ms, 10_000);
        assert_eq!(region.widgets[0].transitions.len(), 2);
        assert_eq!(region.widgets[1].kind, WidgetKind::Image);
    }

    #[test]
    fn defaults_use_duration_to_true_when_absent() {
        let layout = parse_xlf(SAMPLE, LayoutId::new("l1")).unwrap();
        assert!(layout.regions[0].widgets[1].use_duration);
    }

    #[test]
    fn rejects_document_without_layout_element() {
        let result = parse_xlf("<foo></foo>", LayoutId::new("l1"));
        assert!(result.is_err());
    }

    #[test]
    fn picks_in_and_out_transitions_out_of_a_mixed_list() {
        let layout = parse_xlf(SAMPLE, LayoutId::new("l1")).unwrap();
        let widget = &layout.regions[0].widgets[0];
        assert!(matches!(widget.in_transition().unwrap().kind, TransitionKind::FadeIn));
        assert!(matches!(widget.out_transition().unwrap().kind, TransitionKind::FlyOut(Direction::North)));
        assert!(layout.regions[0].widgets[1].in_transition().is_none());
    }
}
