//! Classification of invertible visual elements.

use std::fmt;

use crate::dom::{Dom, NodeId};

/// An element kind that can carry the inversion filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    /// Root of an inline vector graphic, never one of its shapes.
    Svg,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Image, MediaKind::Video, MediaKind::Svg];

    /// Matches a tag name, ignoring ASCII case.
    pub fn of(tag_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| tag_name.eq_ignore_ascii_case(kind.tag_name()))
    }

    pub fn tag_name(self) -> &'static str {
        match self {
            Self::Image => "img",
            Self::Video => "video",
            Self::Svg => "svg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_name())
    }
}

pub fn media_kind(dom: &Dom, node_id: NodeId) -> Option<MediaKind> {
    dom.tag_name(node_id).and_then(MediaKind::of)
}

pub fn is_media(dom: &Dom, node_id: NodeId) -> bool {
    media_kind(dom, node_id).is_some()
}
