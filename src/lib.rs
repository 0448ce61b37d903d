//! Toggle a color-inversion filter on the image, video or inline SVG closest
//! to the last right-click.
//!
//! The crate models the page side of a context-menu extension: a document
//! arena parsed from HTML, a [`Page`] that records the `contextmenu` target
//! and reacts to the `toggle-invert` command, the budgeted nearby-media
//! search in [`locator`], and the string-exact style toggle in [`filter`].

use std::error::Error as StdError;
use std::fmt;

mod dom;
pub mod filter;
mod html;
pub mod locator;
pub mod media;
pub mod menu;
mod page;
mod selector;
mod tracker;

pub use dom::{Dom, MutationRecord, NodeId};
pub use filter::{INVERSION_SEGMENT, InversionState, ToggleReport};
pub use locator::{Located, NodeLocator, SearchOptions, locate_nearby_media};
pub use media::MediaKind;
pub use menu::{Delivery, MenuClick, MenuEntry, MenuRegistry, Relay};
pub use page::{Command, CommandOutcome, Page};
pub use tracker::ReferenceTracker;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    InvalidNode(String),
    StylePattern(String),
    InvalidConfig(String),
    MenuItemExists(String),
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::InvalidNode(msg) => write!(f, "invalid node: {msg}"),
            Self::StylePattern(msg) => write!(f, "style pattern error: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::MenuItemExists(id) => write!(f, "menu item already exists: {id}"),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}
