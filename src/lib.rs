//! # smg-rs: Symbolic Memory Graphs in Rust
//!
//! **`smg-rs`** is an abstract-interpretation engine that models the heap and
//! stack of a C-like program as a graph, the **Symbolic Memory Graph** (SMG).
//! It computes over-approximations of reachable memory states and detects
//! invalid reads, invalid writes, invalid frees and memory leaks.
//!
//! ## What is an SMG?
//!
//! An SMG has two kinds of nodes: *objects* (regions of memory, list segments
//! summarizing unboundedly many list nodes, optional objects) and *values*
//! (opaque symbolic numbers and addresses). *Has-value edges* say which value
//! is stored at which bit range of an object; *points-to edges* say which
//! object (and offset) an address value refers to.
//!
//! ## Key Features
//!
//! - **Immutable States**: Every operation on an [`SmgState`][crate::state::SmgState] returns new states. The graph is built on persistent `im` maps, so successors share structure.
//! - **List Abstraction**: Chains of equally shaped singly or doubly linked nodes are folded into list segments ([`abstraction`]) and materialized again on access.
//! - **Join and Subsumption**: States meeting at a confluence point are joined or checked for coverage ([`join`]).
//! - **Violations as Data**: Bugs of the analyzed program are recorded in the state ([`violation`]), modeling faults are [`SmgError`][crate::error::SmgError]s.
//!
//! ## Basic Usage
//!
//! ```rust
//! use num_bigint::BigInt;
//! use smg_rs::context::AnalysisContext;
//! use smg_rs::frame::FunctionDecl;
//! use smg_rs::options::SmgOptions;
//! use smg_rs::state::SmgState;
//!
//! // 1. Initialize the analysis context and enter `main`
//! let ctx = AnalysisContext::with_options(SmgOptions::default());
//! let state = SmgState::initial(ctx).add_stack_frame(FunctionDecl::void("main")).unwrap();
//!
//! // 2. Allocate 16 bytes and keep the pointer in `p`
//! let (state, p) = state.add_local_variable(64, "p").unwrap();
//! let allocated = state.allocate_heap(128, "buf").unwrap().remove(0);
//! let pointer = allocated.value.unwrap();
//! let state = allocated.state.write_value(p, 0, 64, pointer).unwrap();
//!
//! // 3. Free it twice
//! let object = state.smg().points_to(pointer).unwrap().object;
//! let state = state.free(object, 0).unwrap();
//! assert!(!state.has_memory_errors());
//! let state = state.free(object, 0).unwrap();
//! assert!(state.has_memory_errors());
//! ```
//!
//! ## Core Components
//!
//! - **[`graph`]**: The memory graph and its mutation primitives.
//! - **[`memory`]**: Stack frames, globals, heap classification, reachability.
//! - **[`state`]**: The abstract state: read, write, allocation, pointers.
//! - **[`abstraction`]**: List-segment folding and materialization.
//! - **[`join`]**: Join, merge and subsumption.
//! - **[`intersect`]**: Intersection of states.
//! - **[`eval`]** and **[`transfer`]**: Expression evaluation and per-edge successors.
//! - **[`dot`]**: Utilities for visualizing states using Graphviz.

pub mod abstraction;
pub mod consistency;
pub mod context;
pub mod debug;
pub mod dot;
pub mod edge;
pub mod error;
pub mod eval;
pub mod explicit;
pub mod expr;
pub mod frame;
pub mod graph;
pub mod intersect;
pub mod join;
pub mod machine;
pub mod memory;
pub mod object;
pub mod options;
pub mod path;
pub mod shutdown;
pub mod state;
pub mod transfer;
pub mod types;
pub mod violation;
