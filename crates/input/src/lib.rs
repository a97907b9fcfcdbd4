//! Mouse/keyboard/touch dispatch: turns raw device events into the small
//! set of semantic [`InputCommand`]s the orchestrator applies to the
//! viewport and its toggled modes. Platform-agnostic — no windowing crate
//! in this dependency list, mirroring how the teacher's own pointer-input
//! layer stays decoupled from any particular windowing backend.

use std::collections::{HashMap, HashSet};

/// Mouse buttons the controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Keys the controller reacts to. Anything else (text entry, unrelated
/// shortcuts) is the host's concern and never reaches this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Enter,
    Shift,
    Space,
    Toggle(ToggleKey),
}

/// The six keys that map to a mode toggle or one-shot action, per §4.7.
/// Modelled uniformly because the spec requires all of them to report
/// press/release distinctly rather than firing once per OS auto-repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleKey {
    FitToView,
    Grid,
    Outline,
    PerformancePanel,
    LayerPanel,
    Minimap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    Pressed,
    Released,
}

/// Pan by 50 screen pixels per arrow-key press, per §4.7.
pub const ARROW_KEY_PAN_PX: f64 = 50.0;
/// Enter / Shift+Enter zoom by this factor at the canvas center.
pub const KEYBOARD_ZOOM_FACTOR: f64 = 1.1;
/// Scroll-wheel zoom factor applied per notch of wheel delta.
pub const WHEEL_ZOOM_FACTOR_PER_NOTCH: f64 = 1.1;

/// Semantic command emitted by the controller. The orchestrator is the
/// only consumer; it owns the `ZoomLimits.clamp` call every `Pan`/`Zoom`
/// must pass through before it touches viewport state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputCommand {
    Pan { dx_px: f64, dy_px: f64 },
    Zoom { factor: f64, screen_cx: f64, screen_cy: f64 },
    CursorMoved { screen_x: f64, screen_y: f64 },
    /// One of the six toggle/one-shot keys changed state. `Pressed` fires
    /// exactly once per physical press (OS key-repeat is deduplicated);
    /// `Released` always follows it. Hosts implementing "hold to peek"
    /// semantics apply the action on `Pressed` and revert it on
    /// `Released`; hosts implementing a plain toggle apply it on
    /// `Pressed` and ignore `Released`.
    Toggle { key: ToggleKey, phase: KeyPhase },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragState {
    Idle,
    /// `via_space` distinguishes a middle-button drag (ends on
    /// middle-button release) from a Space+left drag (ends on either
    /// Space release or left-button release).
    Dragging { via_space: bool },
}

/// Dispatches mouse, keyboard, and touch events into [`InputCommand`]s.
/// Holds only the state needed to turn level-triggered device input
/// (button-down/up, key-down/up) into edge-triggered commands: drag
/// phase, which keys are currently held, and active touch points.
pub struct InputController {
    drag: DragState,
    space_held: bool,
    text_input_focused: bool,
    last_cursor: (f64, f64),
    canvas_size: (f64, f64),
    held_toggle_keys: HashSet<ToggleKey>,
    touches: HashMap<u64, (f64, f64)>,
}

impl Default for InputController {
    fn default() -> Self {
        Self::new()
    }
}

impl InputController {
    pub fn new() -> Self {
        Self {
            drag: DragState::Idle,
            space_held: false,
            text_input_focused: false,
            last_cursor: (0.0, 0.0),
            canvas_size: (0.0, 0.0),
            held_toggle_keys: HashSet::new(),
            touches: HashMap::new(),
        }
    }

    /// Tracks the canvas size so Enter/Shift+Enter can zoom about its
    /// center without the caller re-supplying it on every key event.
    pub fn resize(&mut self, width_px: f64, height_px: f64) {
        self.canvas_size = (width_px, height_px);
    }

    /// While focused on a text-input element, Space must not be captured
    /// for pan-drag — the host toggles this around its own text fields.
    pub fn set_text_input_focused(&mut self, focused: bool) {
        self.text_input_focused = focused;
        if focused {
            self.space_held = false;
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.drag, DragState::Dragging { .. })
    }

    // -- Mouse --------------------------------------------------------

    pub fn on_mouse_down(&mut self, button: MouseButton, screen_x: f64, screen_y: f64) -> Option<InputCommand> {
        self.last_cursor = (screen_x, screen_y);
        match button {
            MouseButton::Middle => {
                self.drag = DragState::Dragging { via_space: false };
                None
            }
            MouseButton::Left if self.space_held => {
                self.drag = DragState::Dragging { via_space: true };
                None
            }
            _ => None,
        }
    }

    pub fn on_mouse_up(&mut self, button: MouseButton) -> Option<InputCommand> {
        match (self.drag, button) {
            (DragState::Dragging { via_space: false }, MouseButton::Middle) => {
                self.drag = DragState::Idle;
            }
            (DragState::Dragging { via_space: true }, MouseButton::Left) => {
                self.drag = DragState::Idle;
            }
            _ => {}
        }
        None
    }

    /// While dragging, emits a `Pan`; otherwise a `CursorMoved` for the
    /// coordinates overlay. Per the input state machine, `DRAGGING`
    /// suppresses coordinate updates.
    pub fn on_mouse_move(&mut self, screen_x: f64, screen_y: f64) -> InputCommand {
        let (prev_x, prev_y) = self.last_cursor;
        self.last_cursor = (screen_x, screen_y);
        if self.is_dragging() {
            InputCommand::Pan { dx_px: screen_x - prev_x, dy_px: screen_y - prev_y }
        } else {
            InputCommand::CursorMoved { screen_x, screen_y }
        }
    }

    pub fn on_mouse_wheel(&mut self, delta_notches: f64, screen_x: f64, screen_y: f64) -> InputCommand {
        self.last_cursor = (screen_x, screen_y);
        let factor = WHEEL_ZOOM_FACTOR_PER_NOTCH.powf(delta_notches);
        InputCommand::Zoom { factor, screen_cx: screen_x, screen_cy: screen_y }
    }

    // -- Keyboard -------------------------------------------------------

    pub fn on_key_down(&mut self, key: Key, shift_held: bool) -> Option<InputCommand> {
        match key {
            Key::ArrowUp => Some(InputCommand::Pan { dx_px: 0.0, dy_px: ARROW_KEY_PAN_PX }),
            Key::ArrowDown => Some(InputCommand::Pan { dx_px: 0.0, dy_px: -ARROW_KEY_PAN_PX }),
            Key::ArrowLeft => Some(InputCommand::Pan { dx_px: ARROW_KEY_PAN_PX, dy_px: 0.0 }),
            Key::ArrowRight => Some(InputCommand::Pan { dx_px: -ARROW_KEY_PAN_PX, dy_px: 0.0 }),
            Key::Enter => {
                let (cx, cy) = (self.canvas_size.0 / 2.0, self.canvas_size.1 / 2.0);
                let factor = if shift_held { 1.0 / KEYBOARD_ZOOM_FACTOR } else { KEYBOARD_ZOOM_FACTOR };
                Some(InputCommand::Zoom { factor, screen_cx: cx, screen_cy: cy })
            }
            Key::Shift => None,
            Key::Space => {
                if !self.text_input_focused {
                    self.space_held = true;
                }
                None
            }
            Key::Toggle(toggle_key) => {
                if self.held_toggle_keys.insert(toggle_key) {
                    Some(InputCommand::Toggle { key: toggle_key, phase: KeyPhase::Pressed })
                } else {
                    // OS auto-repeat while already held: the spec requires
                    // exactly one Pressed per physical key-down.
                    None
                }
            }
        }
    }

    pub fn on_key_up(&mut self, key: Key) -> Option<InputCommand> {
        match key {
            Key::Space => {
                self.space_held = false;
                if let DragState::Dragging { via_space: true } = self.drag {
                    self.drag = DragState::Idle;
                }
                None
            }
            Key::Toggle(toggle_key) => {
                self.held_toggle_keys.remove(&toggle_key);
                Some(InputCommand::Toggle { key: toggle_key, phase: KeyPhase::Released })
            }
            _ => None,
        }
    }

    // -- Touch ------------------------------------------------------------

    pub fn on_touch_start(&mut self, touch_id: u64, screen_x: f64, screen_y: f64) {
        self.touches.insert(touch_id, (screen_x, screen_y));
    }

    /// One active touch pans; two pan via pinch-zoom centred on the
    /// midpoint of both touch points.
    pub fn on_touch_move(&mut self, touch_id: u64, screen_x: f64, screen_y: f64) -> Option<InputCommand> {
        let previous = *self.touches.get(&touch_id)?;
        self.touches.insert(touch_id, (screen_x, screen_y));

        match self.touches.len() {
            1 => Some(InputCommand::Pan { dx_px: screen_x - previous.0, dy_px: screen_y - previous.1 }),
            2 => {
                let mut points = self.touches.values().copied();
                let a = points.next()?;
                let b = points.next()?;
                let previous_distance = distance(previous, other_touch(&self.touches, touch_id)?);
                let current_distance = distance(a, b);
                if previous_distance <= f64::EPSILON {
                    return None;
                }
                let factor = current_distance / previous_distance;
                let midpoint = ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0);
                Some(InputCommand::Zoom { factor, screen_cx: midpoint.0, screen_cy: midpoint.1 })
            }
            _ => None,
        }
    }

    pub fn on_touch_end(&mut self, touch_id: u64) {
        self.touches.remove(&touch_id);
    }
}

fn other_touch(touches: &HashMap<u64, (f64, f64)>, excluding: u64) -> Option<(f64, f64)> {
    touches.iter().find(|(id, _)| **id != excluding).map(|(_, point)| *point)
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
