use serde::{Deserialize, Serialize};

/// Source of "the user is close to the end of the list" events. Production
/// shells feed viewport scroll math or an intersection observer; tests feed
/// fixed values.
pub trait ProximitySignal {
    fn near_end(&self, threshold_px: f64) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub content_height: f64,
}

impl ScrollMetrics {
    pub fn distance_to_bottom(&self) -> f64 {
        (self.content_height - (self.scroll_top + self.viewport_height)).max(0.0)
    }
}

impl ProximitySignal for ScrollMetrics {
    fn near_end(&self, threshold_px: f64) -> bool {
        self.distance_to_bottom() < threshold_px
    }
}

/// Visibility of a sentinel element placed after the last rendered row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentinelVisibility(pub bool);

impl ProximitySignal for SentinelVisibility {
    fn near_end(&self, _threshold_px: f64) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "decision")]
pub enum GrowthDecision {
    Grown { from: usize, to: usize },
    /// Another growth request is still settling.
    Busy,
    /// Every row is already visible.
    Exhausted,
    /// The window was reset while this request was settling.
    Stale,
    NotNearEnd,
}

/// Proof that a growth request was admitted. Completing it applies the
/// growth unless the window was reset in between.
#[derive(Debug, PartialEq, Eq)]
pub struct GrowthTicket {
    epoch: u64,
}

/// Rendered prefix of the sorted view, grown by scrolling and reset by
/// filter changes.
#[derive(Debug, Clone)]
pub struct PaginationWindow {
    initial: usize,
    increment: usize,
    requested: usize,
    in_flight: bool,
    epoch: u64,
}

impl PaginationWindow {
    pub fn new(page_size: usize) -> Self {
        Self::with_increment(page_size, page_size)
    }

    pub fn with_increment(initial: usize, increment: usize) -> Self {
        let initial = initial.max(1);
        Self {
            initial,
            increment: increment.max(1),
            requested: initial,
            in_flight: false,
            epoch: 0,
        }
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    /// Number of rows currently rendered; never larger than `total`.
    pub fn window_size(&self, total: usize) -> usize {
        self.requested.min(total)
    }

    pub fn visible<'a, T>(&self, view: &'a [T]) -> &'a [T] {
        &view[..self.window_size(view.len())]
    }

    pub fn has_more(&self, total: usize) -> bool {
        self.requested < total
    }

    pub fn is_growing(&self) -> bool {
        self.in_flight
    }

    /// Back to the first page. Any growth still settling becomes stale.
    pub fn reset(&mut self) {
        self.requested = self.initial;
        self.in_flight = false;
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn try_begin_growth(&mut self, total: usize) -> Result<GrowthTicket, GrowthDecision> {
        if self.in_flight {
            return Err(GrowthDecision::Busy);
        }
        if self.requested >= total {
            return Err(GrowthDecision::Exhausted);
        }
        self.in_flight = true;
        Ok(GrowthTicket { epoch: self.epoch })
    }

    pub fn complete_growth(&mut self, ticket: GrowthTicket, total: usize) -> GrowthDecision {
        if ticket.epoch != self.epoch {
            return GrowthDecision::Stale;
        }
        self.in_flight = false;
        let from = self.window_size(total);
        if self.requested >= total {
            return GrowthDecision::Exhausted;
        }
        self.requested = (self.requested + self.increment).min(total);
        GrowthDecision::Grown {
            from,
            to: self.requested,
        }
    }

    /// Begin and complete in one step, for callers without a settle delay.
    pub fn grow(&mut self, total: usize) -> GrowthDecision {
        match self.try_begin_growth(total) {
            Ok(ticket) => self.complete_growth(ticket, total),
            Err(decision) => decision,
        }
    }
}
