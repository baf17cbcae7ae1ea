use std::fmt;

use crate::{
    Command,
    layout::{self, OVERLAY_SIZE, OverlaySurface, Point, SCREEN_MARGIN, Size},
};

/// Process-local overlay token. Never reused and unrelated to [`Command::id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(u64);

impl OverlayId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "overlay-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPhase {
    Placed,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayEntry {
    pub id: OverlayId,
    pub command: Command,
    pub origin: Point,
    pub size: Size,
    pub phase: OverlayPhase,
}

/// Live overlays, keyed by [`OverlayId`], kept in placement order.
///
/// Placement is incremental: adding or removing an entry never moves the
/// others.
#[derive(Debug)]
pub struct OverlayRegistry {
    entries: Vec<OverlayEntry>,
    next_id: u64,
}

impl OverlayRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn place<S: OverlaySurface + ?Sized>(&mut self, command: Command, surface: &S) -> OverlayId {
        let screen = surface.visible_frame();
        let raw = match self.lowest_y(surface) {
            Some(lowest_y) => layout::stack_below(lowest_y, OVERLAY_SIZE, screen),
            None => layout::first_origin(OVERLAY_SIZE, screen),
        };
        let origin = layout::clamp_origin(raw, OVERLAY_SIZE, SCREEN_MARGIN, screen);

        let id = OverlayId(self.next_id);
        self.next_id += 1;
        self.entries.push(OverlayEntry {
            id,
            command,
            origin,
            size: OVERLAY_SIZE,
            phase: OverlayPhase::Placed,
        });
        id
    }

    /// Removing an unknown id is not an error: completion and dismissal can
    /// race with a forced clear.
    pub fn remove(&mut self, id: OverlayId) -> Option<OverlayEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let mut entry = self.entries.remove(index);
        entry.phase = OverlayPhase::Dismissed;
        Some(entry)
    }

    pub fn clear(&mut self) -> Vec<OverlayEntry> {
        self.entries
            .drain(..)
            .map(|mut entry| {
                entry.phase = OverlayPhase::Dismissed;
                entry
            })
            .collect()
    }

    /// The presentation layer moved an overlay window (e.g. user drag).
    pub fn record_moved(&mut self, id: OverlayId, origin: Point) -> bool {
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.origin = origin;
                true
            }
            None => false,
        }
    }

    pub fn list_active(&self) -> &[OverlayEntry] {
        &self.entries
    }

    pub fn get(&self, id: OverlayId) -> Option<&OverlayEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lowest_y<S: OverlaySurface + ?Sized>(&self, surface: &S) -> Option<i32> {
        self.entries
            .iter()
            .map(|entry| surface.current_origin(entry.id).unwrap_or(entry.origin).y)
            .min()
    }
}

impl Default for OverlayRegistry {
    fn default() -> Self {
        Self::new()
    }
}
