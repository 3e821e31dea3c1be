use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

// CMS-declared artifact identity (RequiredFile).
string_id!(FileId);
// One layout as authored in the CMS.
string_id!(LayoutId);
// A region inside a layout's XLF document.
string_id!(RegionId);
// A widget inside a region.
string_id!(WidgetId);
// Media referenced by a widget; resolved through the cache.
string_id!(MediaId);
// A schedule entry (standalone layout / campaign / overlay / interrupt).
string_id!(ScheduleEntryId);
