/// Near-bottom distance used to resume follow mode deterministically.
const FOLLOW_RESUME_THRESHOLD: f32 = 24.0;
/// Small delta used to ignore floating-point scroll jitter.
const SCROLL_DELTA_EPSILON: f32 = 1.0;

/// Follow-bottom state for a message list, independent of any view toolkit.
///
/// `offset` is the distance scrolled from the top and `max_offset` the
/// largest reachable distance, so the reader is at the tail when
/// `offset ≈ max_offset`. The view reports both after every layout or user
/// scroll via [`ScrollTracker::update`], then asks
/// [`ScrollTracker::apply_pending_scroll`] whether to jump to the tail.
#[derive(Debug)]
pub struct ScrollTracker {
    follow_bottom: bool,
    pending_scroll_to_bottom: bool,
    last_offset: f32,
    last_max_offset: f32,
}

impl ScrollTracker {
    pub fn new() -> Self {
        Self {
            follow_bottom: true,
            pending_scroll_to_bottom: false,
            last_offset: 0.0,
            last_max_offset: 0.0,
        }
    }

    pub fn is_following_bottom(&self) -> bool {
        self.follow_bottom
    }

    /// Force a jump to the newest message, e.g. right after the reader sent
    /// one themselves.
    pub fn request_scroll_to_bottom(&mut self) {
        self.pending_scroll_to_bottom = true;
        self.follow_bottom = true;
    }

    /// Reset for a fresh conversation: a newly opened timeline starts
    /// pinned to its newest message.
    pub fn reset(&mut self) {
        self.last_offset = 0.0;
        self.last_max_offset = 0.0;
        self.follow_bottom = true;
        self.pending_scroll_to_bottom = true;
    }

    /// Reconciles follow mode with what the view just observed.
    pub fn update(&mut self, offset: f32, max_offset: f32) {
        let offset_delta = offset - self.last_offset;
        let content_size_changed =
            (max_offset - self.last_max_offset).abs() > SCROLL_DELTA_EPSILON;
        let user_scrolled_up = offset_delta < -SCROLL_DELTA_EPSILON && !content_size_changed;
        let user_scrolled_down = offset_delta > SCROLL_DELTA_EPSILON && !content_size_changed;

        // Keep follow mode enabled while an explicit follow request is
        // still being fulfilled.
        if self.pending_scroll_to_bottom
            || (content_size_changed && self.was_near_bottom())
        {
            self.follow_bottom = true;
        } else if self.follow_bottom {
            // Pause follow mode only when the reader moves away from the
            // tail on their own.
            if user_scrolled_up {
                self.follow_bottom = false;
            }
        } else if user_scrolled_down && is_near_bottom(offset, max_offset) {
            // Resume once the reader intentionally returns to the tail.
            self.follow_bottom = true;
        }

        self.last_offset = offset;
        self.last_max_offset = max_offset;
    }

    /// Target offset the view should scroll to now, or `None` when the
    /// reader has scrolled away and must not be force-scrolled.
    pub fn apply_pending_scroll(&mut self, max_offset: f32) -> Option<f32> {
        let should_scroll = self.follow_bottom || self.pending_scroll_to_bottom;
        self.pending_scroll_to_bottom = false;

        if should_scroll {
            self.last_offset = max_offset;
            self.last_max_offset = max_offset;
            Some(max_offset.max(0.0))
        } else {
            None
        }
    }

    fn was_near_bottom(&self) -> bool {
        is_near_bottom(self.last_offset, self.last_max_offset)
    }
}

impl Default for ScrollTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn is_near_bottom(offset: f32, max_offset: f32) -> bool {
    if max_offset <= 0.0 {
        return true;
    }

    (max_offset - offset).abs() <= FOLLOW_RESUME_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_pinned_reader_follows_new_content() {
        let mut tracker = ScrollTracker::new();
        tracker.update(500.0, 500.0);

        // New message grows the content while the reader sits at the tail.
        tracker.update(500.0, 620.0);
        assert!(tracker.is_following_bottom());
        assert_eq!(tracker.apply_pending_scroll(620.0), Some(620.0));
    }

    #[test]
    fn scrolling_up_pauses_follow_mode() {
        let mut tracker = ScrollTracker::new();
        tracker.update(500.0, 500.0);

        tracker.update(200.0, 500.0);
        assert!(!tracker.is_following_bottom());

        // New content must not yank the reader back down.
        tracker.update(200.0, 650.0);
        assert!(!tracker.is_following_bottom());
        assert_eq!(tracker.apply_pending_scroll(650.0), None);
    }

    #[test]
    fn returning_to_the_tail_resumes_follow_mode() {
        let mut tracker = ScrollTracker::new();
        tracker.update(500.0, 500.0);
        tracker.update(200.0, 500.0);
        assert!(!tracker.is_following_bottom());

        tracker.update(495.0, 500.0);
        assert!(tracker.is_following_bottom());
    }

    #[test]
    fn an_explicit_request_overrides_a_paused_reader() {
        let mut tracker = ScrollTracker::new();
        tracker.update(500.0, 500.0);
        tracker.update(100.0, 500.0);
        assert!(!tracker.is_following_bottom());

        tracker.request_scroll_to_bottom();
        assert_eq!(tracker.apply_pending_scroll(500.0), Some(500.0));
        assert!(tracker.is_following_bottom());
    }

    #[test]
    fn reset_re_pins_a_fresh_conversation() {
        let mut tracker = ScrollTracker::new();
        tracker.update(500.0, 500.0);
        tracker.update(100.0, 500.0);

        tracker.reset();
        assert!(tracker.is_following_bottom());
        assert_eq!(tracker.apply_pending_scroll(80.0), Some(80.0));
    }

    #[test]
    fn short_content_counts_as_the_tail() {
        let tracker = ScrollTracker::new();
        assert!(tracker.is_following_bottom());
        assert!(is_near_bottom(0.0, 0.0));
    }
}
