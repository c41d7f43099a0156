//! End-to-end scenarios across the codec, engine and proxy layers.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! (fixed seeds for randomized ones) so failures reproduce.

#![cfg(test)]

mod helpers;

mod test_codec_order;
mod test_commit_durability;
mod test_delete_all_rollback;
mod test_end_to_end_scenario;
mod test_index_consistency;
mod test_mvcc_visibility;
mod test_point_rollback;
mod test_save_load_snapshot;
mod test_scan_boundedness;
mod test_shrink_idempotence;
