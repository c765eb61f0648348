/*! A rendering interface with tracked resource states.
 *
 *  Resources carry their usage state with them. Command lists track the
 *  states they locally know about while recording, and submission
 *  reconciles what each list assumed against what is globally true,
 *  stitching patch transitions in front of lists where the two disagree.
 *  Binding happens through GPU-visible descriptor ranges carved out of
 *  growable per-kind heaps.
 *
 *  The backend is abstracted behind [`hal`]'s `Api` trait; the in-tree
 *  implementation is `hal::null`, which records submissions for tests.
 */

#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
    // We use loops for getting early-out of scope without closures.
    clippy::never_loop,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Needless updates are more scaleable, easier to play with features.
    clippy::needless_update,
    // Clashes with clippy::pattern_type_mismatch
    clippy::needless_borrowed_reference,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod binding_model;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod resource;
pub mod track;

pub use hal::{DeviceError, FenceValue, Label};
