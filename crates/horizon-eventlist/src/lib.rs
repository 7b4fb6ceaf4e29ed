//! Horizon EventList - observable lists, live views and a table renderer.
//!
//! This is the main crate of the workspace; it re-exports the core crate's
//! signal and property APIs.
//!
//! Data flows one way: mutations enter at an [`ObservableList`], travel as
//! [`ListEvent`]s through a chain of views, and end at consumers such as a
//! [`TableRenderer`], which turns them into render, attach and detach calls.
//!
//! ```text
//! ObservableList ──▶ SortedView ──▶ FilteredView ──▶ RangedView ──▶ TableRenderer
//!                    └──────────────── ViewStack ────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use horizon_eventlist::{EventList, FilteredView, ObservableList, SortedView};
//!
//! let list = Arc::new(ObservableList::from_vec(vec![7, 2, 9, 4]));
//! let sorted = Arc::new(SortedView::sorted_by(list.clone(), |a: &i32, b: &i32| a.cmp(b)));
//! let small = FilteredView::filtered_by(sorted, |n: &i32| *n < 8);
//! assert_eq!(small.to_vec(), vec![2, 4, 7]);
//!
//! list.push(3).unwrap();
//! assert_eq!(small.to_vec(), vec![2, 3, 4, 7]);
//! ```

pub use horizon_eventlist_core::*;

pub mod config;
pub mod error;
pub mod event;
pub mod list;
pub mod stack;
pub mod table;
pub mod view;

pub use config::{RangeConfig, TableConfig, DEFAULT_PAGE_SIZE};
pub use error::{ListError, ListResult};
pub use event::{ChangeListener, EventList, ListEvent, ListEventKind, ListId, SharedList};
pub use list::ObservableList;
pub use stack::{StageKind, ViewStack};
pub use table::{RowRenderer, RowState, TableRenderer};
pub use view::{
    comparator, predicate, Capability, Comparator, FilteredView, ObservingView, Predicate,
    RangedView, SortedView,
};
