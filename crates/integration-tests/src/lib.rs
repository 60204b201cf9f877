//! Shared home for the cross-crate behaviour tests under `tests/`.
