//! Domain model for authors, documents and the reference graph.
//!
//! # Responsibility
//! - Define canonical records shared by stores, services and the cascade engine.
//! - Keep the reference graph as an adjacency model over integer ids.
//!
//! # Invariants
//! - Documents and authors are identified by stable positive integer ids.
//! - A document's reference set never contains its own id.

pub mod author;
pub mod document;
