//! Pipeline stages for chapter acquisition and publishing.
//!
//! Each submodule implements one step and is testable on its own; the
//! renderer and the object store are reached only through traits.
//!
//! ## Data Flow
//!
//! ```text
//! seed URL ──▶ url_pattern ──▶ sequence ──▶ chapter ──▶ archive ──▶ publish
//!                              (per index)    │
//!                                             ├─ extract   locators from rendered elements
//!                                             ├─ fetch     bytes, ordered and bounded
//!                                             ├─ image     width policy + re-encode
//!                                             ├─ workspace NNN.<ext> page files
//!                                             └─ merge     pairwise stack, renumber
//! ```
//!
//! 1. [`url_pattern`]: infer a chapter-URL template from the seed
//! 2. [`sequence`]   : plan indices and run chapters strictly in order;
//!    stop on a not-found chapter
//! 3. [`chapter`]    : one chapter end to end on the shared renderer session
//! 4. [`archive`]    : zip every finished workspace; runs in `spawn_blocking`
//! 5. [`publish`]    : upload, share link, deferred retraction

pub mod archive;
pub mod chapter;
pub mod extract;
pub mod fetch;
pub mod image;
pub mod merge;
pub mod publish;
pub mod sequence;
pub mod url_pattern;
pub mod workspace;
