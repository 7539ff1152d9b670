// ABOUTME: Dockerfile synthesis from recorded sandbox traces
// ABOUTME: Replays successful mutating commands on top of a clone-and-checkout bootstrap

pub mod synth;

pub use synth::{parse_steps, synthesize, Recipe, RecipeMeta};
