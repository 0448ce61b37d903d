use std::collections::HashMap;
use std::fmt;

use super::dom::{Dom, NodeId};
use super::filter::{self, InversionState, ToggleReport};
use super::html::parse_html;
use super::locator::{Located, NodeLocator, SearchOptions};
use super::tracker::ReferenceTracker;
use super::{Error, Result, truncate_chars};

const CONTEXT_MENU_EVENT: &str = "contextmenu";

/// Messages the page context understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleInvert,
}

impl Command {
    pub const TOGGLE_INVERT: &'static str = "toggle-invert";

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            Self::TOGGLE_INVERT => Some(Self::ToggleInvert),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToggleInvert => Self::TOGGLE_INVERT,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The message was not a known command.
    Ignored,
    /// No interaction recorded, or its node left the document.
    NoTarget,
    /// Nothing invertible near the recorded node.
    NoMedia,
    Toggled(ToggleReport),
}

/// What a page-registered listener does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerAction {
    StopPropagation,
    PreventDefault,
}

#[derive(Debug, Clone, Copy)]
struct Listener {
    capture: bool,
    action: ListenerAction,
}

#[derive(Debug, Default, Clone)]
struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Listener>>>,
}

impl ListenerStore {
    fn add(&mut self, node_id: NodeId, event: String, listener: Listener) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event)
            .or_default()
            .push(listener);
    }

    fn get(&self, node_id: NodeId, event: &str, capture: bool) -> Vec<Listener> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .map(|listeners| {
                listeners
                    .iter()
                    .filter(|listener| listener.capture == capture)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct EventState {
    event_type: String,
    target: NodeId,
    current_target: NodeId,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            default_prevented: false,
            propagation_stopped: false,
        }
    }
}

/// The page context: document, interaction tracking and the toggle command.
pub struct Page {
    dom: Dom,
    listeners: ListenerStore,
    tracker: ReferenceTracker,
    locator: NodeLocator,
    trace: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        Ok(Self::from_dom(parse_html(html)?))
    }

    pub fn from_dom(dom: Dom) -> Self {
        Self {
            dom,
            listeners: ListenerStore::default(),
            tracker: ReferenceTracker::new(),
            locator: NodeLocator::default(),
            trace: false,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        }
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn search_options(&self) -> &SearchOptions {
        self.locator.options()
    }

    pub fn set_search_options(&mut self, options: SearchOptions) {
        self.locator = NodeLocator::new(options);
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::InvalidConfig(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        if self.trace_logs.len() > self.trace_log_limit {
            let excess = self.trace_logs.len() - self.trace_log_limit;
            self.trace_logs.drain(..excess);
        }
        Ok(())
    }

    /// Registers a page listener that stops `event` from propagating past
    /// the matched element.
    pub fn stop_propagation_at(&mut self, selector: &str, event: &str, capture: bool) -> Result<()> {
        let target = self.select_one(selector)?;
        self.listeners.add(
            target,
            event.to_string(),
            Listener {
                capture,
                action: ListenerAction::StopPropagation,
            },
        );
        Ok(())
    }

    pub fn prevent_default_at(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.listeners.add(
            target,
            event.to_string(),
            Listener {
                capture: false,
                action: ListenerAction::PreventDefault,
            },
        );
        Ok(())
    }

    /// Right-clicks the matched element. Returns `false` if a page listener
    /// cancelled the default menu.
    pub fn context_menu(&mut self, selector: &str) -> Result<bool> {
        let target = self.select_one(selector)?;
        Ok(self.context_menu_node(target))
    }

    pub fn context_menu_node(&mut self, target: NodeId) -> bool {
        let event = self.dispatch_event(target, CONTEXT_MENU_EVENT);
        !event.default_prevented
    }

    /// Node the next toggle command would start from.
    pub fn last_target(&self) -> Option<NodeId> {
        self.tracker.current(&self.dom)
    }

    pub fn handle_message(&mut self, raw: &str) -> Result<CommandOutcome> {
        let Some(command) = Command::parse(raw) else {
            self.trace_line(format!("[command] ignored message={raw:?}"));
            return Ok(CommandOutcome::Ignored);
        };
        self.handle_command(command)
    }

    pub fn handle_command(&mut self, command: Command) -> Result<CommandOutcome> {
        match command {
            Command::ToggleInvert => self.toggle_invert(),
        }
    }

    fn toggle_invert(&mut self) -> Result<CommandOutcome> {
        let Some(start) = self.tracker.current(&self.dom) else {
            self.trace_line(format!(
                "[command] {} no target held={}",
                Command::ToggleInvert,
                self.tracker.held().is_some()
            ));
            return Ok(CommandOutcome::NoTarget);
        };

        let located = self.locator.locate(&self.dom, Some(start));
        self.trace_located(start, &located);
        if located.is_empty() {
            return Ok(CommandOutcome::NoMedia);
        }

        let report = filter::toggle_inversion(&mut self.dom, &located.elements)?;
        if self.trace {
            let labels = located
                .elements
                .iter()
                .map(|node| self.trace_node_label(*node))
                .collect::<Vec<_>>()
                .join(",");
            self.trace_line(format!(
                "[toggle] targets={labels} inverted={} restored={}",
                report.inverted, report.restored
            ));
        }
        Ok(CommandOutcome::Toggled(report))
    }

    /// Runs the locator from the matched element without toggling anything.
    pub fn locate(&mut self, selector: &str) -> Result<Located> {
        let start = self.select_one(selector)?;
        let located = self.locator.locate(&self.dom, Some(start));
        self.trace_located(start, &located);
        Ok(located)
    }

    pub fn remove(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.remove_node(target)
    }

    pub fn append_html(&mut self, selector: &str, html: &str) -> Result<Vec<NodeId>> {
        let target = self.select_one(selector)?;
        let fragment = parse_html(html)?;
        self.dom.adopt_fragment(target, &fragment)
    }

    /// Replaces the matched element's children, like assigning `innerHTML`.
    pub fn set_inner_html(&mut self, selector: &str, html: &str) -> Result<Vec<NodeId>> {
        let target = self.select_one(selector)?;
        let fragment = parse_html(html)?;
        self.dom.clear_children(target)?;
        self.dom.adopt_fragment(target, &fragment)
    }

    pub fn set_attribute(&mut self, selector: &str, name: &str, value: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.set_attr(target, name, value)
    }

    /// Delivers queued mutation records to the tracker as one batch and
    /// returns how many records it held.
    pub fn flush_mutations(&mut self) -> usize {
        let batch = self.dom.take_mutations();
        if batch.is_empty() {
            return 0;
        }
        if self.tracker.observe(&self.dom, &batch) {
            self.trace_line(format!(
                "[mutation] batch={} reference cleared",
                batch.len()
            ));
        } else {
            self.trace_line(format!("[mutation] batch={}", batch.len()));
        }
        batch.len()
    }

    pub fn attr(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let target = self.select_one(selector)?;
        Ok(self.dom.attr(target, name).map(str::to_string))
    }

    pub fn inversion_state(&self, selector: &str) -> Result<InversionState> {
        let target = self.select_one(selector)?;
        filter::inversion_state(&self.dom, target)
            .ok_or_else(|| Error::InvalidNode(format!("{selector} is not an element")))
    }

    pub fn assert_attr(&self, selector: &str, name: &str, expected: Option<&str>) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.attr(target, name);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("{name}={expected:?}"),
                actual: format!("{name}={actual:?}"),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_inverted(&self, selector: &str, expected: bool) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = filter::inversion_state(&self.dom, target) == Some(InversionState::Inverted);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("inverted={expected}"),
                actual: format!("inverted={actual}"),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    pub fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    pub fn select_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        self.dom.query_selector_all(selector)
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> EventState {
        let mut event = EventState::new(event_type, target);

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.dom.parent(node);
        }
        path.reverse();

        // The tracker listens ahead of anything the page registers, so a
        // page that stops the event still cannot hide its target.
        if event_type == CONTEXT_MENU_EVENT && path.first() == Some(&self.dom.root()) {
            self.tracker.record(target);
            let label = self.trace_node_label(target);
            self.trace_line(format!("[event] {event_type} recorded target={label}"));
        }

        // Capture phase.
        if let Some((_, ancestors)) = path.split_last() {
            for node in ancestors {
                event.current_target = *node;
                self.invoke_listeners(*node, &mut event, true);
                if event.propagation_stopped {
                    self.trace_event_done(&event, "propagation_stopped");
                    return event;
                }
            }
        }

        // Target phase: capture listeners first.
        event.current_target = target;
        self.invoke_listeners(target, &mut event, true);
        if !event.propagation_stopped {
            self.invoke_listeners(target, &mut event, false);
        }
        if event.propagation_stopped {
            self.trace_event_done(&event, "propagation_stopped");
            return event;
        }

        // Bubble phase.
        if let Some((_, ancestors)) = path.split_last() {
            for node in ancestors.iter().rev() {
                event.current_target = *node;
                self.invoke_listeners(*node, &mut event, false);
                if event.propagation_stopped {
                    self.trace_event_done(&event, "propagation_stopped");
                    return event;
                }
            }
        }

        self.trace_event_done(&event, "completed");
        event
    }

    fn invoke_listeners(&mut self, node_id: NodeId, event: &mut EventState, capture: bool) {
        for listener in self.listeners.get(node_id, &event.event_type, capture) {
            match listener.action {
                ListenerAction::StopPropagation => event.propagation_stopped = true,
                ListenerAction::PreventDefault => event.default_prevented = true,
            }
        }
    }

    fn trace_located(&mut self, start: NodeId, located: &Located) {
        if !self.trace {
            return;
        }
        let start_label = self.trace_node_label(start);
        let level = located
            .matched_level
            .map(|level| level.to_string())
            .unwrap_or_else(|| "none".into());
        self.trace_line(format!(
            "[locate] start={start_label} found={} level={level} climbed={} visited={}",
            located.len(),
            located.levels_climbed,
            located.nodes_visited
        ));
    }

    fn trace_event_done(&mut self, event: &EventState, outcome: &str) {
        if !self.trace {
            return;
        }
        let target_label = self.trace_node_label(event.target);
        let current_label = self.trace_node_label(event.current_target);
        self.trace_line(format!(
            "[event] done {} target={} current={} outcome={} default_prevented={}",
            event.event_type, target_label, current_label, outcome, event.default_prevented
        ));
    }

    fn trace_line(&mut self, line: String) {
        if self.trace {
            if self.trace_to_stderr {
                eprintln!("{line}");
            }
            if self.trace_logs.len() >= self.trace_log_limit {
                self.trace_logs.remove(0);
            }
            self.trace_logs.push(line);
        }
    }

    fn trace_node_label(&self, node: NodeId) -> String {
        if let Some(id) = self.dom.attr(node, "id") {
            if !id.is_empty() {
                return format!("#{id}");
            }
        }
        self.dom
            .tag_name(node)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("node-{}", node.index()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parse_accepts_only_toggle_invert() {
        assert_eq!(Command::parse("toggle-invert"), Some(Command::ToggleInvert));
        assert_eq!(Command::parse(" toggle-invert\n"), Some(Command::ToggleInvert));
        assert_eq!(Command::parse("toggle"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::ToggleInvert.to_string(), "toggle-invert");
    }

    #[test]
    fn capture_tracker_sees_target_even_when_page_stops_event() -> Result<()> {
        let mut page = Page::from_html(
            "<div id='wrap'><span id='label'>x</span><img id='pic'></div>",
        )?;
        page.stop_propagation_at("#wrap", "contextmenu", true)?;
        page.context_menu("#label")?;
        assert_eq!(page.last_target(), Some(page.select_one("#label")?));
        Ok(())
    }

    #[test]
    fn search_options_replacement_applies_to_locate() -> Result<()> {
        let mut page =
            Page::from_html("<div><img id='a'><img id='b'><span id='s'></span></div>")?;
        assert_eq!(page.search_options(), &SearchOptions::default());

        let single = SearchOptions::default().with_max_media_per_result(1);
        page.set_search_options(single);
        assert_eq!(page.search_options(), &single);

        let images = page.select_all("img")?;
        assert_eq!(images.len(), 2);
        assert_eq!(page.locate("#s")?.elements, vec![images[0]]);
        assert!(page.select_all("video")?.is_empty());
        Ok(())
    }

    #[test]
    fn prevent_default_is_reported() -> Result<()> {
        let mut page = Page::from_html("<img id='pic'>")?;
        assert!(page.context_menu("#pic")?);
        page.prevent_default_at("#pic", "contextmenu")?;
        assert!(!page.context_menu("#pic")?);
        Ok(())
    }

    #[test]
    fn latest_interaction_wins() -> Result<()> {
        let mut page = Page::from_html("<img id='a'><img id='b'>")?;
        page.context_menu("#a")?;
        page.context_menu("#b")?;
        page.handle_command(Command::ToggleInvert)?;
        page.assert_inverted("#a", false)?;
        page.assert_inverted("#b", true)?;
        Ok(())
    }

    #[test]
    fn detached_elements_are_not_tracked() -> Result<()> {
        let mut page = Page::from_html("<div id='d'><img id='pic'></div>")?;
        let pic = page.select_one("#pic")?;
        page.remove("#d")?;
        page.context_menu_node(pic);
        assert_eq!(page.last_target(), None);
        assert_eq!(
            page.handle_command(Command::ToggleInvert)?,
            CommandOutcome::NoTarget
        );
        Ok(())
    }

    #[test]
    fn trace_records_locate_and_toggle() -> Result<()> {
        let mut page = Page::from_html("<figure><img id='pic'><figcaption id='cap'>c</figcaption></figure>")?;
        page.set_trace_stderr(false);
        page.enable_trace(true);
        page.context_menu("#cap")?;
        page.handle_message("toggle-invert")?;
        let logs = page.take_trace_logs();
        assert!(logs.iter().any(|line| line.contains("[event] contextmenu recorded target=#cap")));
        assert!(
            logs.iter()
                .any(|line| line.starts_with("[locate] start=#cap found=1 level=1"))
        );
        assert!(logs.iter().any(|line| line.contains("[toggle] targets=#pic inverted=1")));
        assert!(page.take_trace_logs().is_empty());
        Ok(())
    }

    #[test]
    fn trace_log_limit_keeps_newest_entries() -> Result<()> {
        let mut page = Page::from_html("<img id='pic'>")?;
        page.set_trace_stderr(false);
        page.enable_trace(true);
        for _ in 0..3 {
            page.handle_message("noise")?;
        }
        page.handle_message("last")?;
        page.set_trace_log_limit(2)?;
        let logs = page.take_trace_logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[1].contains("\"last\""));
        assert_eq!(
            page.set_trace_log_limit(0),
            Err(Error::InvalidConfig(
                "set_trace_log_limit requires at least 1 entry".into()
            ))
        );
        Ok(())
    }

    #[test]
    fn assertion_failure_carries_snippet() -> Result<()> {
        let page = Page::from_html("<img id='pic' style='color:red;'>")?;
        let err = page
            .assert_attr("#pic", "style", None)
            .expect_err("style is set");
        match err {
            Error::AssertionFailed {
                selector,
                dom_snippet,
                ..
            } => {
                assert_eq!(selector, "#pic");
                assert!(dom_snippet.starts_with("<img"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }
}
