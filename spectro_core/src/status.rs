//! Acquisition lifecycle states and the events reported to observers.

/// Where a measurement is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    /// Pushing pending parameters to the device.
    PreparingParams,
    /// Host-driven laser ignition (software Raman with auto-dark only).
    LaserWarmup,
    /// Exposures running and packets being read.
    Acquiring,
    PostProcessing,
    Complete,
    /// Terminal; the error was returned to the caller.
    Failed,
}

impl AcquisitionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Observer notification; sent best-effort, never blocks the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionEvent {
    StateChanged {
        from: AcquisitionState,
        to: AcquisitionState,
    },
    /// Pixels read so far in the current exposure (1-based).
    Progress {
        exposure: u8,
        pixels_read: usize,
        pixels_expected: usize,
    },
}
