//! The inversion toggle.
//!
//! Whether an element is inverted is read from its inline `style` attribute
//! every time: the element is inverted exactly when [`INVERSION_SEGMENT`]
//! appears at a declaration boundary. Only that literal is ever inserted or
//! removed; other declarations are left as written.

use std::sync::OnceLock;

use fancy_regex::Regex;

use crate::dom::{Dom, NodeId};
use crate::{Error, Result};

pub const INVERSION_SEGMENT: &str = "filter:invert(1) hue-rotate(180deg);";

const STYLE_ATTR: &str = "style";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InversionState {
    Normal,
    Inverted,
}

/// Counts of what one [`toggle_inversion`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToggleReport {
    pub inverted: usize,
    pub restored: usize,
    pub skipped: usize,
}

impl ToggleReport {
    pub fn touched(&self) -> usize {
        self.inverted + self.restored
    }
}

fn separator_runs() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, String>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r";(?:\s*;)+").map_err(|err| err.to_string()))
        .as_ref()
        .map_err(|msg| Error::StylePattern(msg.clone()))
}

/// Byte offset of the segment, if it starts a declaration.
///
/// `backdrop-filter:invert(1) hue-rotate(180deg);` contains the segment text
/// but is a different declaration, so a match must sit at the start of the
/// attribute or after a `;`.
pub fn find_inversion(style: &str) -> Option<usize> {
    style.match_indices(INVERSION_SEGMENT).find_map(|(at, _)| {
        let before = style[..at].trim_end();
        (before.is_empty() || before.ends_with(';')).then_some(at)
    })
}

pub fn contains_inversion(style: &str) -> bool {
    find_inversion(style).is_some()
}

/// `style` with the segment appended after a separator. Unchanged if the
/// segment is already there.
pub fn with_inversion(style: &str) -> String {
    if contains_inversion(style) {
        return style.to_string();
    }
    let trimmed = style.trim();
    let mut out = String::with_capacity(trimmed.len() + INVERSION_SEGMENT.len() + 1);
    out.push_str(trimmed);
    if !out.is_empty() && !out.ends_with(';') {
        out.push(';');
    }
    out.push_str(INVERSION_SEGMENT);
    out
}

/// `style` without any copy of the segment, or `None` when nothing else is
/// left and the attribute should go away.
pub fn without_inversion(style: &str) -> Result<Option<String>> {
    let mut rest = style.to_string();
    while let Some(at) = find_inversion(&rest) {
        rest.replace_range(at..at + INVERSION_SEGMENT.len(), "");
    }
    let collapsed = separator_runs()?.replace_all(&rest, ";");
    let trimmed = collapsed.trim_matches(|c: char| c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!("{trimmed};")))
}

pub fn inversion_state(dom: &Dom, node: NodeId) -> Option<InversionState> {
    if !dom.is_element(node) {
        return None;
    }
    let inverted = dom.attr(node, STYLE_ATTR).is_some_and(contains_inversion);
    Some(if inverted {
        InversionState::Inverted
    } else {
        InversionState::Normal
    })
}

/// Flips one element and returns its new state. Non-elements are left alone.
pub fn toggle_element(dom: &mut Dom, node: NodeId) -> Result<Option<InversionState>> {
    let Some(state) = inversion_state(dom, node) else {
        return Ok(None);
    };
    let style = dom.attr(node, STYLE_ATTR).unwrap_or_default().to_string();
    match state {
        InversionState::Inverted => {
            match without_inversion(&style)? {
                Some(rest) => dom.set_attr(node, STYLE_ATTR, &rest)?,
                None => dom.remove_attr(node, STYLE_ATTR)?,
            }
            Ok(Some(InversionState::Normal))
        }
        InversionState::Normal => {
            dom.set_attr(node, STYLE_ATTR, &with_inversion(&style))?;
            Ok(Some(InversionState::Inverted))
        }
    }
}

/// Flips every element independently.
pub fn toggle_inversion(dom: &mut Dom, elements: &[NodeId]) -> Result<ToggleReport> {
    let mut report = ToggleReport::default();
    for node in elements {
        match toggle_element(dom, *node)? {
            Some(InversionState::Inverted) => report.inverted += 1,
            Some(InversionState::Normal) => report.restored += 1,
            None => report.skipped += 1,
        }
    }
    Ok(report)
}
