/// Follow-the-tail state for the message view.
///
/// The presentation layer reports whether its viewport is pinned to the end;
/// the controller asks whether new content should re-anchor the view or only
/// raise a "new content" affordance.
#[derive(Debug, Clone)]
pub struct TailFollow {
    pinned: bool,
    unseen_content: bool,
}

impl TailFollow {
    pub fn new() -> Self {
        Self {
            pinned: true,
            unseen_content: false,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn has_unseen_content(&self) -> bool {
        self.unseen_content
    }

    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
        // Returning to the tail shows everything that arrived meanwhile.
        if pinned {
            self.unseen_content = false;
        }
    }

    /// Records new tail content; returns true when the view should scroll to the end.
    pub fn content_appended(&mut self) -> bool {
        if self.pinned {
            return true;
        }
        self.unseen_content = true;
        false
    }

    /// Fresh log: follow the tail again.
    pub fn reset(&mut self) {
        self.pinned = true;
        self.unseen_content = false;
    }
}

impl Default for TailFollow {
    fn default() -> Self {
        Self::new()
    }
}
