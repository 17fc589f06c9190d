use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use folio_core::AnnotationKind;

/// Lines scrolled per mouse wheel notch.
const WHEEL_LINES: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Down,
    Drag,
    Up,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ScrollLines { lines: i32 },
    ScrollPages { pages: i32 },
    GotoPage { page: usize },
    ScaleBy { factor: f32 },
    ResetScale,
    ToggleFitWidth,
    ToggleEraseMode,
    Pointer {
        kind: PointerKind,
        column: u16,
        row: u16,
    },
    Annotate(AnnotationKind),
    /// Closes the selection popup or the annotation details.
    Dismiss,
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

/// Turns crossterm input into viewer actions, keeping a vi-style numeric
/// prefix between key presses.
#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) => self.map_key(key),
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            _ => UiEvent::None,
        }
    }

    fn map_key(&mut self, KeyEvent { code, modifiers, .. }: KeyEvent) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_count();
                UiEvent::Quit
            }
            (KeyCode::Char('d'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::ScrollPages {
                    pages: self.take_count() as i32,
                }
            }
            (KeyCode::Char('u'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::ScrollPages {
                    pages: -(self.take_count() as i32),
                }
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, _) => UiEvent::ScrollLines {
                lines: self.take_count() as i32,
            },
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, _) => UiEvent::ScrollLines {
                lines: -(self.take_count() as i32),
            },
            (KeyCode::Char(' '), _) | (KeyCode::PageDown, _) => UiEvent::ScrollPages {
                pages: self.take_count() as i32,
            },
            (KeyCode::PageUp, _) => UiEvent::ScrollPages {
                pages: -(self.take_count() as i32),
            },
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.pending_count.take().filter(|page| *page > 0).unwrap_or(1);
                self.pending_digits.clear();
                UiEvent::GotoPage { page }
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                let page = self
                    .pending_count
                    .take()
                    .filter(|page| *page > 0)
                    .unwrap_or(usize::MAX);
                self.pending_digits.clear();
                UiEvent::GotoPage { page }
            }
            (KeyCode::Char('+'), _) => {
                self.reset_count();
                UiEvent::ScaleBy { factor: 1.1 }
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                UiEvent::ScaleBy { factor: 0.9 }
            }
            (KeyCode::Char('='), _) => {
                self.reset_count();
                UiEvent::ResetScale
            }
            (KeyCode::Char('w'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::ToggleFitWidth
            }
            (KeyCode::Char('x'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::ToggleEraseMode
            }
            (KeyCode::Char('h'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Annotate(AnnotationKind::Highlight)
            }
            (KeyCode::Char('u'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Annotate(AnnotationKind::Underline)
            }
            (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::Dismiss
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> UiEvent {
        let kind = match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => PointerKind::Down,
            MouseEventKind::Drag(MouseButton::Left) => PointerKind::Drag,
            MouseEventKind::Up(MouseButton::Left) => PointerKind::Up,
            MouseEventKind::ScrollDown => return UiEvent::ScrollLines { lines: WHEEL_LINES },
            MouseEventKind::ScrollUp => return UiEvent::ScrollLines { lines: -WHEEL_LINES },
            _ => return UiEvent::None,
        };
        self.reset_count();
        UiEvent::Pointer {
            kind,
            column: mouse.column,
            row: mouse.row,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        self.pending_count = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        (!self.pending_digits.is_empty()).then(|| self.pending_digits.clone())
    }
}
