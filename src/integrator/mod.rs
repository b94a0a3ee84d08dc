// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! The topology reconciliation engine: classify one inbound edit, execute
//! its structural consequence, publish the events describing it.

pub mod classifier;
pub mod dispatch;
pub mod mutator;
