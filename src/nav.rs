//! Mobile navigation menu as an explicit state machine.
//!
//! Every user gesture maps to one `MenuCommand`; `dispatch` applies it and
//! returns the side effects for the view layer to perform. Nothing here
//! touches a DOM, so the whole behaviour is testable on its own.

use serde::Deserialize;

pub const OPENED_ANNOUNCEMENT: &str = "Navigation menu opened";
pub const CLOSED_ANNOUNCEMENT: &str = "Navigation menu closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MenuConfig {
  /// Widths at or below this are treated as mobile
  pub breakpoint: u32,
  /// Keep Tab focus inside the open menu
  pub focus_trap: bool,
  pub close_on_outside_click: bool,
}

impl Default for MenuConfig {
  fn default() -> Self {
    Self {
      breakpoint: 768,
      focus_trap: true,
      close_on_outside_click: true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MenuState {
  #[default]
  Closed,
  Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
  Next,
  Previous,
  First,
  Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
  Toggle,
  Open,
  Close,
  Escape,
  /// Click whose target lies outside the navigation container
  OutsideClick,
  LinkActivated,
  Resize { width: u32 },
  OrientationChange { width: u32 },
  /// Tab pressed while link `focused` has focus
  Tab { shift: bool, focused: usize },
  /// Arrow/Home/End pressed while link `focused` has focus
  Key(NavKey, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuEffect {
  /// Reflect state on the toggle's aria-expanded and active classes
  SetExpanded(bool),
  /// Lock or restore page scrolling behind the menu
  LockScroll(bool),
  FocusFirstLink,
  FocusToggle,
  FocusLink(usize),
  Announce(&'static str),
}

/// One menu per page.
#[derive(Debug, Clone)]
pub struct MenuController {
  config: MenuConfig,
  state: MenuState,
  link_count: usize,
}

impl MenuController {
  pub fn new(config: MenuConfig, link_count: usize) -> Self {
    Self {
      config,
      state: MenuState::Closed,
      link_count,
    }
  }

  pub fn state(&self) -> MenuState {
    self.state
  }

  pub fn is_open(&self) -> bool {
    self.state == MenuState::Open
  }

  /// Whether the mobile menu should be mounted at this viewport width.
  pub fn is_mobile(&self, width: u32) -> bool {
    width <= self.config.breakpoint
  }

  pub fn dispatch(&mut self, command: MenuCommand) -> Vec<MenuEffect> {
    match command {
      MenuCommand::Toggle => {
        if self.is_open() {
          self.close()
        } else {
          self.open()
        }
      }
      MenuCommand::Open => self.open(),
      MenuCommand::Close | MenuCommand::Escape | MenuCommand::LinkActivated => self.close(),
      MenuCommand::OutsideClick if self.config.close_on_outside_click => self.close(),
      MenuCommand::OutsideClick => Vec::new(),
      MenuCommand::Resize { width } if width > self.config.breakpoint => self.close(),
      MenuCommand::Resize { .. } => Vec::new(),
      MenuCommand::OrientationChange { width } if width <= self.config.breakpoint => self.reset(),
      MenuCommand::OrientationChange { .. } => Vec::new(),
      MenuCommand::Tab { shift, focused } => self.trap_focus(shift, focused),
      MenuCommand::Key(key, focused) => self.move_focus(key, focused),
    }
  }

  fn open(&mut self) -> Vec<MenuEffect> {
    if self.is_open() {
      return Vec::new();
    }
    self.state = MenuState::Open;
    vec![
      MenuEffect::SetExpanded(true),
      MenuEffect::FocusFirstLink,
      MenuEffect::Announce(OPENED_ANNOUNCEMENT),
      MenuEffect::LockScroll(true),
    ]
  }

  fn close(&mut self) -> Vec<MenuEffect> {
    if !self.is_open() {
      return Vec::new();
    }
    self.state = MenuState::Closed;
    vec![
      MenuEffect::SetExpanded(false),
      MenuEffect::FocusToggle,
      MenuEffect::Announce(CLOSED_ANNOUNCEMENT),
      MenuEffect::LockScroll(false),
    ]
  }

  /// Close without moving focus or announcing; the layout just changed.
  fn reset(&mut self) -> Vec<MenuEffect> {
    if !self.is_open() {
      return Vec::new();
    }
    self.state = MenuState::Closed;
    vec![MenuEffect::SetExpanded(false), MenuEffect::LockScroll(false)]
  }

  fn trap_focus(&self, shift: bool, focused: usize) -> Vec<MenuEffect> {
    if !self.is_open() || !self.config.focus_trap || self.link_count == 0 {
      return Vec::new();
    }
    let last = self.link_count - 1;
    match (shift, focused) {
      (true, 0) => vec![MenuEffect::FocusLink(last)],
      (false, f) if f == last => vec![MenuEffect::FocusLink(0)],
      _ => Vec::new(),
    }
  }

  fn move_focus(&self, key: NavKey, focused: usize) -> Vec<MenuEffect> {
    let n = self.link_count;
    if n == 0 {
      return Vec::new();
    }
    let focused = focused.min(n - 1);
    let target = match key {
      NavKey::Next => (focused + 1) % n,
      NavKey::Previous => (focused + n - 1) % n,
      NavKey::First => 0,
      NavKey::Last => n - 1,
    };
    vec![MenuEffect::FocusLink(target)]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn menu() -> MenuController {
    MenuController::new(MenuConfig::default(), 4)
  }

  #[test]
  fn test_toggle_opens_then_closes() {
    let mut menu = menu();

    let effects = menu.dispatch(MenuCommand::Toggle);
    assert!(menu.is_open());
    assert!(effects.contains(&MenuEffect::SetExpanded(true)));
    assert!(effects.contains(&MenuEffect::LockScroll(true)));
    assert!(effects.contains(&MenuEffect::Announce(OPENED_ANNOUNCEMENT)));

    let effects = menu.dispatch(MenuCommand::Toggle);
    assert_eq!(menu.state(), MenuState::Closed);
    assert!(effects.contains(&MenuEffect::FocusToggle));
    assert!(effects.contains(&MenuEffect::Announce(CLOSED_ANNOUNCEMENT)));
  }

  #[test]
  fn test_redundant_transitions_have_no_effects() {
    let mut menu = menu();
    assert!(menu.dispatch(MenuCommand::Close).is_empty());
    assert!(menu.dispatch(MenuCommand::Escape).is_empty());
    menu.dispatch(MenuCommand::Open);
    assert!(menu.dispatch(MenuCommand::Open).is_empty());
  }

  #[test]
  fn test_escape_and_link_close() {
    let mut menu = menu();
    menu.dispatch(MenuCommand::Open);
    assert!(!menu.dispatch(MenuCommand::Escape).is_empty());
    assert!(!menu.is_open());

    menu.dispatch(MenuCommand::Open);
    menu.dispatch(MenuCommand::LinkActivated);
    assert!(!menu.is_open());
  }

  #[test]
  fn test_outside_click_respects_config() {
    let mut menu = menu();
    menu.dispatch(MenuCommand::Open);
    menu.dispatch(MenuCommand::OutsideClick);
    assert!(!menu.is_open());

    let mut sticky = MenuController::new(
      MenuConfig {
        close_on_outside_click: false,
        ..MenuConfig::default()
      },
      4,
    );
    sticky.dispatch(MenuCommand::Open);
    assert!(sticky.dispatch(MenuCommand::OutsideClick).is_empty());
    assert!(sticky.is_open());
  }

  #[test]
  fn test_resize_past_breakpoint_closes() {
    let mut menu = menu();
    menu.dispatch(MenuCommand::Open);
    assert!(menu.dispatch(MenuCommand::Resize { width: 768 }).is_empty());
    assert!(menu.is_open());
    menu.dispatch(MenuCommand::Resize { width: 1024 });
    assert!(!menu.is_open());
  }

  #[test]
  fn test_orientation_change_resets_quietly() {
    let mut menu = menu();
    menu.dispatch(MenuCommand::Open);
    let effects = menu.dispatch(MenuCommand::OrientationChange { width: 600 });
    assert_eq!(
      effects,
      vec![MenuEffect::SetExpanded(false), MenuEffect::LockScroll(false)]
    );
    assert!(!menu.is_open());
  }

  #[test]
  fn test_orientation_change_to_desktop_keeps_menu() {
    let mut menu = menu();
    menu.dispatch(MenuCommand::Open);
    assert!(menu
      .dispatch(MenuCommand::OrientationChange { width: 1024 })
      .is_empty());
    assert!(menu.is_open());

    // Threshold is inclusive
    let effects = menu.dispatch(MenuCommand::OrientationChange { width: 768 });
    assert_eq!(effects.len(), 2);
    assert!(!menu.is_open());
  }

  #[test]
  fn test_focus_trap_wraps() {
    let mut menu = menu();
    // Closed: browser handles tab normally
    assert!(menu
      .dispatch(MenuCommand::Tab {
        shift: false,
        focused: 3
      })
      .is_empty());

    menu.dispatch(MenuCommand::Open);
    assert_eq!(
      menu.dispatch(MenuCommand::Tab {
        shift: false,
        focused: 3
      }),
      vec![MenuEffect::FocusLink(0)]
    );
    assert_eq!(
      menu.dispatch(MenuCommand::Tab {
        shift: true,
        focused: 0
      }),
      vec![MenuEffect::FocusLink(3)]
    );
    assert!(menu
      .dispatch(MenuCommand::Tab {
        shift: false,
        focused: 1
      })
      .is_empty());
  }

  #[test]
  fn test_focus_trap_disabled() {
    let mut menu = MenuController::new(
      MenuConfig {
        focus_trap: false,
        ..MenuConfig::default()
      },
      4,
    );
    menu.dispatch(MenuCommand::Open);
    assert!(menu
      .dispatch(MenuCommand::Tab {
        shift: false,
        focused: 3
      })
      .is_empty());
  }

  #[test]
  fn test_arrow_keys_wrap() {
    let mut menu = menu();
    assert_eq!(
      menu.dispatch(MenuCommand::Key(NavKey::Next, 3)),
      vec![MenuEffect::FocusLink(0)]
    );
    assert_eq!(
      menu.dispatch(MenuCommand::Key(NavKey::Previous, 0)),
      vec![MenuEffect::FocusLink(3)]
    );
    assert_eq!(
      menu.dispatch(MenuCommand::Key(NavKey::Last, 1)),
      vec![MenuEffect::FocusLink(3)]
    );
    assert_eq!(
      menu.dispatch(MenuCommand::Key(NavKey::First, 2)),
      vec![MenuEffect::FocusLink(0)]
    );

    let mut empty = MenuController::new(MenuConfig::default(), 0);
    assert!(empty.dispatch(MenuCommand::Key(NavKey::Next, 0)).is_empty());
  }

  #[test]
  fn test_stale_focus_index_is_clamped() {
    let mut menu = menu();
    assert_eq!(
      menu.dispatch(MenuCommand::Key(NavKey::Next, usize::MAX)),
      vec![MenuEffect::FocusLink(0)]
    );
    assert_eq!(
      menu.dispatch(MenuCommand::Key(NavKey::Previous, 9)),
      vec![MenuEffect::FocusLink(2)]
    );
  }

  #[test]
  fn test_is_mobile() {
    let menu = menu();
    assert!(menu.is_mobile(375));
    assert!(menu.is_mobile(768));
    assert!(!menu.is_mobile(769));
  }

  #[test]
  fn test_config_defaults_from_yaml() {
    let config: MenuConfig = serde_yaml::from_str("breakpoint: 640").unwrap();
    assert_eq!(config.breakpoint, 640);
    assert!(config.focus_trap);
    assert!(config.close_on_outside_click);
  }
}
