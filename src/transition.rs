//! Turns consecutive presentation states into animation intents.

use crate::types::{Easing, PresentationState, Target, TransitionIntent};

pub const RESIZE_DURATION_MS: u64 = 300;
pub const FADE_OUT_DURATION_MS: u64 = 150;
pub const FADE_IN_DURATION_MS: u64 = 250;
/// Lets the outgoing fade clear before the incoming one starts.
pub const FADE_IN_DELAY_MS: u64 = 50;
/// A growing pill starts slightly small and settles at full scale.
pub const GROW_SCALE_FROM: f32 = 0.96;
/// A shrinking pill dips slightly below full scale.
pub const SHRINK_SCALE_TO: f32 = 0.98;

const CONTENT_REGIONS: [Target; 2] = [Target::CompactContent, Target::ExpandedContent];

/// Remembers the previous state and which content regions are on screen.
#[derive(Debug, Clone)]
pub struct TransitionOrchestrator {
    previous: PresentationState,
    visible: Vec<Target>,
}

impl TransitionOrchestrator {
    pub fn new(initial: PresentationState) -> Self {
        let visible = initial.mode.content_region().into_iter().collect();
        Self {
            previous: initial,
            visible,
        }
    }

    pub fn previous(&self) -> &PresentationState {
        &self.previous
    }

    pub fn is_visible(&self, target: Target) -> bool {
        self.visible.contains(&target)
    }

    /// Intents that take the renderer from the previous state to `next`.
    ///
    /// Metadata-only changes produce nothing.
    pub fn advance(&mut self, next: &PresentationState) -> Vec<TransitionIntent> {
        let mut intents = Vec::new();
        let from = self.previous.geometry();
        let to = next.geometry();

        if from != to {
            let (easing, from_scale, to_scale) = if to.area() > from.area() {
                (Easing::QuinticOut, GROW_SCALE_FROM, 1.0)
            } else {
                (Easing::CubicOut, 1.0, SHRINK_SCALE_TO)
            };
            intents.push(TransitionIntent::Resize {
                target: Target::Pill,
                from_width: from.width,
                from_height: from.height,
                to_width: to.width,
                to_height: to.height,
                from_scale,
                to_scale,
                duration_ms: RESIZE_DURATION_MS,
                easing,
            });
        }

        if self.previous.mode != next.mode {
            let incoming = next.mode.content_region();

            for region in CONTENT_REGIONS {
                if Some(region) != incoming && self.is_visible(region) {
                    intents.push(TransitionIntent::Fade {
                        target: region,
                        from_opacity: 1.0,
                        to_opacity: 0.0,
                        duration_ms: FADE_OUT_DURATION_MS,
                        delay_ms: 0,
                    });
                    self.visible.retain(|visible| *visible != region);
                }
            }

            if let Some(region) = incoming {
                intents.push(TransitionIntent::Fade {
                    target: region,
                    from_opacity: 0.0,
                    to_opacity: 1.0,
                    duration_ms: FADE_IN_DURATION_MS,
                    delay_ms: FADE_IN_DELAY_MS,
                });
                if !self.is_visible(region) {
                    self.visible.push(region);
                }
            }
        }

        log::debug!(
            "Transition {:?} -> {:?}: {} intent(s)",
            self.previous.mode,
            next.mode,
            intents.len()
        );
        self.previous = next.clone();
        intents
    }
}
