//! Window-to-source scheduling
//!
//! Every window shows one of three sources. At random intervals the mapping is
//! reshuffled so that at least two windows change. Independently, the window
//! showing the still image is periodically "mirrored": it temporarily shows a
//! live source instead, then reverts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Content a window can show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    Webcam,
    Video,
    StaticImage,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Webcam, SourceId::Video, SourceId::StaticImage];

    pub fn label(&self) -> &'static str {
        match self {
            SourceId::Webcam => "webcam",
            SourceId::Video => "video",
            SourceId::StaticImage => "static",
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Base window mapping plus an optional temporary override
///
/// The override only ever replaces the still image on the window that owns
/// it, so the owner can always be recovered from `base`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAssignment {
    base: Vec<SourceId>,
    mirror: Option<(usize, SourceId)>,
}

impl WindowAssignment {
    /// Window `i` starts on source `i % 3`: webcam, video, still image
    pub fn initial(window_count: usize) -> Self {
        Self {
            base: (0..window_count).map(|i| SourceId::ALL[i % SourceId::ALL.len()]).collect(),
            mirror: None,
        }
    }

    pub fn window_count(&self) -> usize {
        self.base.len()
    }

    /// What a window actually shows this frame
    pub fn source_for(&self, window: usize) -> Option<SourceId> {
        match self.mirror {
            Some((mirrored, source)) if mirrored == window => Some(source),
            _ => self.base.get(window).copied(),
        }
    }

    pub fn base(&self) -> &[SourceId] {
        &self.base
    }

    pub fn mirror(&self) -> Option<(usize, SourceId)> {
        self.mirror
    }

    /// Window whose base source is the still image
    pub fn static_owner(&self) -> Option<usize> {
        self.base.iter().position(|s| *s == SourceId::StaticImage)
    }

    /// With three windows, each source appears exactly once
    pub fn is_bijection(&self) -> bool {
        self.base.len() == SourceId::ALL.len()
            && SourceId::ALL.iter().all(|s| self.base.iter().filter(|b| *b == s).count() == 1)
    }

    /// Per-window sources with the override applied
    pub fn effective(&self) -> Vec<SourceId> {
        (0..self.base.len()).filter_map(|w| self.source_for(w)).collect()
    }
}

/// Reshuffle and mirror timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleTuning {
    /// Seconds between reshuffles, drawn uniformly after each one
    pub swap_interval_min: f64,
    pub swap_interval_max: f64,
    pub max_shuffle_attempts: u32,
    /// Windows that must change for a shuffle to count
    pub min_changed_windows: usize,
    /// Seconds of still image before mirroring starts
    pub mirror_after: f64,
    pub mirror_duration_min: f64,
    pub mirror_duration_max: f64,
}

impl Default for ScheduleTuning {
    fn default() -> Self {
        Self {
            swap_interval_min: 1.0,
            swap_interval_max: 30.0,
            max_shuffle_attempts: 100,
            min_changed_windows: 2,
            mirror_after: 5.0,
            mirror_duration_min: 5.0,
            mirror_duration_max: 10.0,
        }
    }
}

impl ScheduleTuning {
    pub(crate) fn sanitize(&mut self) {
        self.swap_interval_min = self.swap_interval_min.max(0.0);
        self.swap_interval_max = self.swap_interval_max.max(0.0);
        if self.swap_interval_max < self.swap_interval_min {
            std::mem::swap(&mut self.swap_interval_min, &mut self.swap_interval_max);
        }
        self.mirror_duration_min = self.mirror_duration_min.max(0.0);
        self.mirror_duration_max = self.mirror_duration_max.max(0.0);
        if self.mirror_duration_max < self.mirror_duration_min {
            std::mem::swap(&mut self.mirror_duration_min, &mut self.mirror_duration_max);
        }
        self.mirror_after = self.mirror_after.max(0.0);
        self.max_shuffle_attempts = self.max_shuffle_attempts.max(1);
    }
}

/// Result of a reshuffle attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleOutcome {
    /// A qualifying permutation was found
    Applied { attempts: u32, changed: usize },
    /// No qualifying permutation within the allowed attempts; mapping kept
    Exhausted { attempts: u32 },
}

/// Mirror sub-state for the still-image window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MirrorState {
    Idle {
        owner: Option<usize>,
        shown_since: f64,
    },
    Mirroring {
        owner: usize,
        source: SourceId,
        started_at: f64,
        duration: f64,
    },
}

impl MirrorState {
    fn owner(&self) -> Option<usize> {
        match *self {
            MirrorState::Idle { owner, .. } => owner,
            MirrorState::Mirroring { owner, .. } => Some(owner),
        }
    }
}

/// Mirror transitions reported by a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MirrorTransition {
    Started {
        window: usize,
        source: SourceId,
        duration: f64,
    },
    Ended {
        window: usize,
    },
    /// The still image moved to another window
    Reset {
        owner: Option<usize>,
    },
}

/// What changed during one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    pub shuffle: Option<ShuffleOutcome>,
    pub mirror: Option<MirrorTransition>,
}

/// Owns the window mapping and both timers
pub struct AssignmentScheduler {
    tuning: ScheduleTuning,
    rng: StdRng,
    assignment: WindowAssignment,
    last_swap: f64,
    swap_interval: f64,
    mirror: MirrorState,
}

impl AssignmentScheduler {
    pub fn new(window_count: usize, tuning: ScheduleTuning) -> Self {
        Self::with_rng(window_count, tuning, StdRng::from_os_rng())
    }

    /// Deterministic scheduler for reproducible runs
    pub fn with_seed(window_count: usize, tuning: ScheduleTuning, seed: u64) -> Self {
        Self::with_rng(window_count, tuning, StdRng::seed_from_u64(seed))
    }

    fn with_rng(window_count: usize, mut tuning: ScheduleTuning, rng: StdRng) -> Self {
        tuning.sanitize();
        let assignment = WindowAssignment::initial(window_count);
        let owner = assignment.static_owner();
        let mut scheduler = Self {
            tuning,
            rng,
            assignment,
            last_swap: 0.0,
            swap_interval: 0.0,
            mirror: MirrorState::Idle {
                owner,
                shown_since: 0.0,
            },
        };
        scheduler.swap_interval = scheduler.draw_swap_interval();
        scheduler
    }

    pub fn assignment(&self) -> &WindowAssignment {
        &self.assignment
    }

    pub fn source_for(&self, window: usize) -> Option<SourceId> {
        self.assignment.source_for(window)
    }

    pub fn mirror_state(&self) -> &MirrorState {
        &self.mirror
    }

    /// Seconds the current reshuffle timer waits
    pub fn swap_interval(&self) -> f64 {
        self.swap_interval
    }

    /// Advance both timers to `now` (seconds). Reshuffle is evaluated first.
    pub fn tick(&mut self, now: f64) -> TickReport {
        let mut report = TickReport::default();

        if now - self.last_swap > self.swap_interval {
            let outcome = self.reshuffle();
            match outcome {
                ShuffleOutcome::Applied { attempts, changed } => {
                    tracing::info!(
                        attempts,
                        changed,
                        assignment = ?self.assignment.base,
                        "Windows reshuffled"
                    );
                    let owner = self.assignment.static_owner();
                    self.assignment.mirror = None;
                    self.mirror = MirrorState::Idle {
                        owner,
                        shown_since: now,
                    };
                    report.mirror = Some(MirrorTransition::Reset { owner });
                }
                ShuffleOutcome::Exhausted { attempts } => {
                    tracing::debug!(attempts, "No qualifying shuffle, keeping assignment");
                }
            }
            self.last_swap = now;
            self.swap_interval = self.draw_swap_interval();
            report.shuffle = Some(outcome);
        }

        if let Some(transition) = self.tick_mirror(now) {
            report.mirror = Some(transition);
        }

        report
    }

    fn draw_swap_interval(&mut self) -> f64 {
        self.rng
            .random_range(self.tuning.swap_interval_min..=self.tuning.swap_interval_max)
    }

    /// Fisher-Yates shuffle with retry until enough windows change
    fn reshuffle(&mut self) -> ShuffleOutcome {
        let previous = &self.assignment.base;
        let mut candidate = previous.clone();

        for attempt in 1..=self.tuning.max_shuffle_attempts {
            candidate.copy_from_slice(previous);
            for i in (1..candidate.len()).rev() {
                let j = self.rng.random_range(0..=i);
                candidate.swap(i, j);
            }

            let changed = candidate.iter().zip(previous).filter(|(a, b)| a != b).count();
            if changed >= self.tuning.min_changed_windows {
                self.assignment.base = candidate;
                return ShuffleOutcome::Applied {
                    attempts: attempt,
                    changed,
                };
            }
        }

        ShuffleOutcome::Exhausted {
            attempts: self.tuning.max_shuffle_attempts,
        }
    }

    fn tick_mirror(&mut self, now: f64) -> Option<MirrorTransition> {
        let owner = self.assignment.static_owner();
        if self.mirror.owner() != owner {
            self.assignment.mirror = None;
            self.mirror = MirrorState::Idle {
                owner,
                shown_since: now,
            };
            return Some(MirrorTransition::Reset { owner });
        }

        match self.mirror {
            MirrorState::Idle {
                owner: Some(window),
                shown_since,
            } if now - shown_since > self.tuning.mirror_after => {
                let live = [SourceId::Webcam, SourceId::Video];
                let source = live[self.rng.random_range(0..live.len())];
                let duration = self
                    .rng
                    .random_range(self.tuning.mirror_duration_min..=self.tuning.mirror_duration_max);

                self.assignment.mirror = Some((window, source));
                self.mirror = MirrorState::Mirroring {
                    owner: window,
                    source,
                    started_at: now,
                    duration,
                };
                tracing::info!(window, %source, duration, "Mirror mode started");
                Some(MirrorTransition::Started {
                    window,
                    source,
                    duration,
                })
            }
            MirrorState::Mirroring {
                owner: window,
                started_at,
                duration,
                ..
            } if now - started_at >= duration => {
                self.assignment.mirror = None;
                self.mirror = MirrorState::Idle {
                    owner: Some(window),
                    shown_since: now,
                };
                tracing::info!(window, "Mirror mode ended");
                Some(MirrorTransition::Ended { window })
            }
            _ => None,
        }
    }
}
