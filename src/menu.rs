//! Host side of the extension: the context-menu entry and the relay that
//! forwards a click on it to the page of the clicked tab.

use std::collections::HashMap;

use crate::page::{Command, CommandOutcome, Page};
use crate::{Error, Result};

pub const INVERT_MENU_ID: &str = "invert-media";
pub const INVERT_MENU_TITLE: &str = "Invert image / video / SVG";

pub type TabId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub id: String,
    pub title: String,
    pub contexts: Vec<String>,
}

impl MenuEntry {
    /// The single entry, shown for every kind of right-click target.
    pub fn invert_media() -> Self {
        Self {
            id: INVERT_MENU_ID.to_string(),
            title: INVERT_MENU_TITLE.to_string(),
            contexts: vec!["all".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MenuRegistry {
    entries: Vec<MenuEntry>,
}

impl MenuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[MenuEntry] {
        &self.entries
    }

    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    pub fn create(&mut self, entry: MenuEntry) -> Result<()> {
        if self.entries.iter().any(|existing| existing.id == entry.id) {
            return Err(Error::MenuItemExists(entry.id));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn on_installed(&mut self) -> Result<()> {
        self.recreate()
    }

    pub fn on_startup(&mut self) -> Result<()> {
        self.recreate()
    }

    fn recreate(&mut self) -> Result<()> {
        self.remove_all();
        self.create(MenuEntry::invert_media())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuClick {
    pub menu_item_id: String,
    pub tab: Option<TabId>,
}

impl MenuClick {
    pub fn invert(tab: TabId) -> Self {
        Self {
            menu_item_id: INVERT_MENU_ID.to_string(),
            tab: Some(tab),
        }
    }
}

/// What happened to a forwarded click. Failures are reported, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered(CommandOutcome),
    /// Another menu item, or a click without a tab.
    Ignored,
    /// The tab has no page listening for commands.
    NoReceiver,
    Failed(Error),
}

#[derive(Default)]
pub struct Relay {
    pages: HashMap<TabId, Page>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, tab: TabId, page: Page) -> Option<Page> {
        self.pages.insert(tab, page)
    }

    pub fn detach(&mut self, tab: TabId) -> Option<Page> {
        self.pages.remove(&tab)
    }

    pub fn page(&self, tab: TabId) -> Option<&Page> {
        self.pages.get(&tab)
    }

    pub fn page_mut(&mut self, tab: TabId) -> Option<&mut Page> {
        self.pages.get_mut(&tab)
    }

    pub fn on_clicked(&mut self, click: &MenuClick) -> Delivery {
        if click.menu_item_id != INVERT_MENU_ID {
            return Delivery::Ignored;
        }
        let Some(tab) = click.tab else {
            return Delivery::Ignored;
        };
        let Some(page) = self.pages.get_mut(&tab) else {
            return Delivery::NoReceiver;
        };
        match page.handle_message(Command::ToggleInvert.as_str()) {
            Ok(outcome) => Delivery::Delivered(outcome),
            Err(err) => Delivery::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_hooks_recreate_single_entry() -> Result<()> {
        let mut registry = MenuRegistry::new();
        registry.on_installed()?;
        registry.on_startup()?;
        registry.on_startup()?;
        assert_eq!(registry.entries(), &[MenuEntry::invert_media()]);
        assert_eq!(registry.entries()[0].contexts, vec!["all".to_string()]);
        Ok(())
    }

    #[test]
    fn duplicate_create_is_rejected() -> Result<()> {
        let mut registry = MenuRegistry::new();
        registry.create(MenuEntry::invert_media())?;
        assert_eq!(
            registry.create(MenuEntry::invert_media()),
            Err(Error::MenuItemExists(INVERT_MENU_ID.into()))
        );
        Ok(())
    }

    #[test]
    fn relay_delivers_to_the_clicked_tab() -> Result<()> {
        let mut relay = Relay::new();
        relay.attach(7, Page::from_html("<img id='pic'>")?);
        relay.attach(8, Page::from_html("<img id='pic'>")?);

        let page = relay.page_mut(7).expect("tab 7 attached");
        page.context_menu("#pic")?;

        assert!(matches!(
            relay.on_clicked(&MenuClick::invert(7)),
            Delivery::Delivered(CommandOutcome::Toggled(_))
        ));
        relay.page(7).expect("tab 7").assert_inverted("#pic", true)?;
        assert_eq!(
            relay.on_clicked(&MenuClick::invert(8)),
            Delivery::Delivered(CommandOutcome::NoTarget)
        );
        Ok(())
    }

    #[test]
    fn detached_tab_no_longer_receives_clicks() -> Result<()> {
        let mut relay = Relay::new();
        relay.attach(3, Page::from_html("<img id='pic'>")?);
        relay.page_mut(3).expect("tab 3 attached").context_menu("#pic")?;

        let page = relay.detach(3).expect("tab 3 was attached");
        assert!(relay.page(3).is_none());
        assert_eq!(relay.on_clicked(&MenuClick::invert(3)), Delivery::NoReceiver);
        page.assert_inverted("#pic", false)?;
        assert!(relay.detach(3).is_none());
        Ok(())
    }

    #[test]
    fn relay_swallows_missing_receiver_and_foreign_clicks() {
        let mut relay = Relay::new();
        assert_eq!(relay.on_clicked(&MenuClick::invert(1)), Delivery::NoReceiver);
        assert_eq!(
            relay.on_clicked(&MenuClick {
                menu_item_id: "other".into(),
                tab: Some(1),
            }),
            Delivery::Ignored
        );
        assert_eq!(
            relay.on_clicked(&MenuClick {
                menu_item_id: INVERT_MENU_ID.into(),
                tab: None,
            }),
            Delivery::Ignored
        );
    }
}
