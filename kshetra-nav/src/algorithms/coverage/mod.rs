//! Coverage path planning over mowing zones.
//!
//! ```text
//!  Zone ─┐                        ┌─ Parallel / Zigzag / Grid ─ sweep lines
//!        ├─► Region ─► pattern ───┼─ Spiral / PerimeterFirst ── contour rings + fill
//!  Obstacles (buffered b + w/2) ──┘  └─ Random ─────────────────── seeded tour
//!                                              │
//!                              nearest-next ordering, smoothing
//!                                              │
//!                              blade-off transits (A* when blocked)
//!                                              ▼
//!                                            Path
//! ```
//!
//! Lines are spaced `w·(1 − overlap)` apart with the first line `w/2`
//! inside the outline, so sweep patterns leave no uncovered strip between
//! neighbouring lines. Identical inputs give identical paths and checksums.

mod config;
mod obstacle;
mod pattern;
mod planner;
mod route;
mod sweep;

pub use config::CoverageConfig;
pub use obstacle::{MAP_OBSTACLE_ID_BASE, Obstacle, ObstacleKind, ObstacleShape, mapped_obstacles};
pub use pattern::{CoveragePattern, ResolvedPattern};
pub use planner::{CoveragePlanner, PlanBudget};
pub use route::nearest_next;
pub use sweep::line_offsets;
