use tripsync_core::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Millis },
    /// A flush is running. `rearm` holds the deadline of a request that
    /// arrived meanwhile.
    Flushing { rearm: Option<Millis> },
}

/// Trailing-edge debounce timer driven by explicit time.
///
/// Each [`Debouncer::schedule`] pushes the deadline back. Requests that
/// arrive while a flush runs are not lost: they re-arm the timer once the
/// flush finishes.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay_ms: Millis,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(delay_ms: Millis) -> Self {
        Self {
            delay_ms,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn delay_ms(&self) -> Millis {
        self.delay_ms
    }

    pub fn deadline(&self) -> Option<Millis> {
        match self.state {
            DebounceState::Pending { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn schedule(&mut self, now: Millis) {
        let deadline = now.saturating_add(self.delay_ms);
        self.state = match self.state {
            DebounceState::Idle | DebounceState::Pending { .. } => DebounceState::Pending { deadline },
            DebounceState::Flushing { .. } => DebounceState::Flushing {
                rearm: Some(deadline),
            },
        };
    }

    /// Returns true and enters `Flushing` if the deadline has passed.
    pub fn take_due(&mut self, now: Millis) -> bool {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                self.state = DebounceState::Flushing { rearm: None };
                true
            }
            _ => false,
        }
    }

    /// Enter `Flushing` immediately, superseding any pending deadline.
    pub fn begin_flush(&mut self) {
        if !matches!(self.state, DebounceState::Flushing { .. }) {
            self.state = DebounceState::Flushing { rearm: None };
        }
    }

    pub fn finish(&mut self) {
        if let DebounceState::Flushing { rearm } = self.state {
            self.state = match rearm {
                Some(deadline) => DebounceState::Pending { deadline },
                None => DebounceState::Idle,
            };
        }
    }

    pub fn cancel(&mut self) {
        self.state = DebounceState::Idle;
    }
}
