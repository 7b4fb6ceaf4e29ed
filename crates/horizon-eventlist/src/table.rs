//! Rendering a live list into rows with an attach/detach lifecycle.
//!
//! A [`TableRenderer`] keeps one rendered widget per item of the list it is
//! bound to, plus an optional header and footer. The widgets themselves are
//! produced and notified by a [`RowRenderer`]; the table only decides *when*
//! each callback runs.
//!
//! # Row Lifecycle
//!
//! ```text
//!            render()                 on_attach()
//!   (item) ───────────▶ Rendered ────────────────▶ Attached
//!                          ▲                          │
//!                          └──────────────────────────┘
//!                                 on_detach()
//! ```
//!
//! Rows are rendered as soon as their item appears. They are attached only
//! while the table itself is attached (between
//! [`notify_attached`](TableRenderer::notify_attached) and
//! [`notify_detached`](TableRenderer::notify_detached)). An attached row is
//! always detached before it is discarded, so `on_attach` and `on_detach`
//! calls balance per widget.

use std::sync::{Arc, Weak};

use horizon_eventlist_core::logging::targets;
use horizon_eventlist_core::ConnectionId;
use parking_lot::Mutex;

use crate::config::TableConfig;
use crate::event::{ListEvent, ListEventKind, SharedList};

/// Produces and maintains the widgets of a [`TableRenderer`].
///
/// Callbacks run while the table's state is locked: they must not call back
/// into the table that invoked them.
///
/// A row is rendered once when its item enters the table. A `Changed` event
/// for a row either refreshes the widget through [`update`](Self::update) or,
/// with the default `update`, replaces it with a fresh render. Renderers whose
/// items change through property notification should override `update` so
/// each item is rendered only once while it stays in the table.
pub trait RowRenderer<T>: Send + Sync + 'static {
    /// The rendered representation of a row, header or footer.
    type Widget: Send + 'static;

    /// Renders the row for `item`.
    fn render(&self, item: &T) -> Self::Widget;

    /// Renders the header, if the table has one.
    fn render_header(&self) -> Option<Self::Widget> {
        None
    }

    /// Renders the footer, if the table has one.
    fn render_footer(&self) -> Option<Self::Widget> {
        None
    }

    /// Refreshes `widget` in place for a changed `item`.
    ///
    /// Returning `false` makes the table discard the widget and render a new
    /// one. The default always does, since the table cannot tell whether the
    /// row still shows the same item.
    fn update(&self, _item: &T, _widget: &mut Self::Widget) -> bool {
        false
    }

    /// The row became visible.
    fn on_attach(&self, _item: &T, _widget: &mut Self::Widget) {}

    /// The row stopped being visible.
    fn on_detach(&self, _item: &T, _widget: &mut Self::Widget) {}

    /// The header became visible.
    fn on_attach_header(&self, _widget: &mut Self::Widget) {}

    /// The header stopped being visible.
    fn on_detach_header(&self, _widget: &mut Self::Widget) {}

    /// The footer became visible.
    fn on_attach_footer(&self, _widget: &mut Self::Widget) {}

    /// The footer stopped being visible.
    fn on_detach_footer(&self, _widget: &mut Self::Widget) {}
}

/// Lifecycle state of a rendered row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowState {
    /// Rendered but not visible.
    Rendered,
    /// Rendered and attached.
    Attached,
}

struct RenderRow<T, W> {
    item: T,
    widget: W,
    state: RowState,
}

struct Chrome<W> {
    widget: W,
    attached: bool,
}

struct TableState<T, W> {
    rows: Vec<RenderRow<T, W>>,
    header: Option<Chrome<W>>,
    footer: Option<Chrome<W>>,
    attached: bool,
    connection: Option<ConnectionId>,
    bound: bool,
}

struct TableInner<T, R: RowRenderer<T>> {
    config: TableConfig,
    list: SharedList<T>,
    renderer: R,
    state: Mutex<TableState<T, R::Widget>>,
}

/// Renders a live list into rows.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use horizon_eventlist::{ObservableList, RowRenderer, TableConfig, TableRenderer};
///
/// struct Labels;
///
/// impl RowRenderer<String> for Labels {
///     type Widget = String;
///
///     fn render(&self, item: &String) -> String {
///         format!("[{item}]")
///     }
/// }
///
/// let list = Arc::new(ObservableList::from_vec(vec!["a".to_string()]));
/// let table = TableRenderer::new(list.clone(), Labels, TableConfig::default());
/// table.notify_attached();
///
/// list.push("b".to_string()).unwrap();
/// assert_eq!(table.row_count(), 2);
/// assert_eq!(table.with_row(1, |_, widget| widget.clone()), Some("[b]".to_string()));
/// ```
pub struct TableRenderer<T, R: RowRenderer<T>> {
    inner: Arc<TableInner<T, R>>,
}

impl<T, R> TableRenderer<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: RowRenderer<T>,
{
    /// Binds a table to `list`, rendering the header, every current item and
    /// the footer. The table starts detached.
    pub fn new(list: SharedList<T>, renderer: R, config: TableConfig) -> Self {
        let header = if config.render_header {
            renderer.render_header()
        } else {
            None
        };
        let rows: Vec<RenderRow<T, R::Widget>> = list
            .to_vec()
            .into_iter()
            .map(|item| RenderRow {
                widget: renderer.render(&item),
                item,
                state: RowState::Rendered,
            })
            .collect();
        let footer = if config.render_footer {
            renderer.render_footer()
        } else {
            None
        };

        tracing::debug!(
            target: targets::TABLE,
            table = %config.name,
            rows = rows.len(),
            header = header.is_some(),
            footer = footer.is_some(),
            "table bound"
        );

        let inner = Arc::new(TableInner {
            config,
            list,
            renderer,
            state: Mutex::new(TableState {
                rows,
                header: header.map(|widget| Chrome {
                    widget,
                    attached: false,
                }),
                footer: footer.map(|widget| Chrome {
                    widget,
                    attached: false,
                }),
                attached: false,
                connection: None,
                bound: true,
            }),
        });

        let weak: Weak<TableInner<T, R>> = Arc::downgrade(&inner);
        let connection = inner.list.changes().connect(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_list_event(event);
            }
        });
        inner.state.lock().connection = Some(connection);

        Self { inner }
    }

    /// Snapshot of the items currently rendered, in row order.
    pub fn items(&self) -> Vec<T> {
        self.inner
            .state
            .lock()
            .rows
            .iter()
            .map(|row| row.item.clone())
            .collect()
    }
}

impl<T, R: RowRenderer<T>> TableRenderer<T, R> {
    /// The table's configuration.
    pub fn config(&self) -> &TableConfig {
        &self.inner.config
    }

    /// The list the table renders.
    pub fn list(&self) -> &SharedList<T> {
        &self.inner.list
    }

    /// The row renderer.
    pub fn renderer(&self) -> &R {
        &self.inner.renderer
    }

    /// Returns `true` between `notify_attached` and `notify_detached`.
    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().attached
    }

    /// Returns `true` until [`unbind`](Self::unbind) is called.
    pub fn is_bound(&self) -> bool {
        self.inner.state.lock().bound
    }

    /// Number of rendered rows.
    pub fn row_count(&self) -> usize {
        self.inner.state.lock().rows.len()
    }

    /// Lifecycle state of the row at `index`.
    pub fn row_state(&self, index: usize) -> Option<RowState> {
        self.inner.state.lock().rows.get(index).map(|row| row.state)
    }

    /// Runs `f` on the item and widget of the row at `index`.
    pub fn with_row<F, U>(&self, index: usize, f: F) -> Option<U>
    where
        F: FnOnce(&T, &R::Widget) -> U,
    {
        let state = self.inner.state.lock();
        state.rows.get(index).map(|row| f(&row.item, &row.widget))
    }

    /// Runs `f` on the header widget, if there is one.
    pub fn with_header<F, U>(&self, f: F) -> Option<U>
    where
        F: FnOnce(&R::Widget) -> U,
    {
        let state = self.inner.state.lock();
        state.header.as_ref().map(|header| f(&header.widget))
    }

    /// Runs `f` on the footer widget, if there is one.
    pub fn with_footer<F, U>(&self, f: F) -> Option<U>
    where
        F: FnOnce(&R::Widget) -> U,
    {
        let state = self.inner.state.lock();
        state.footer.as_ref().map(|footer| f(&footer.widget))
    }

    /// The table's container became visible: attach the header, every row
    /// and the footer. Does nothing if already attached or unbound.
    pub fn notify_attached(&self) {
        let mut state = self.inner.state.lock();
        if state.attached || !state.bound {
            return;
        }
        state.attached = true;
        self.inner.attach_all(&mut state);
        tracing::debug!(
            target: targets::TABLE,
            table = %self.inner.config.name,
            rows = state.rows.len(),
            "attached"
        );
    }

    /// The table's container was hidden: detach the footer, every row and
    /// the header. Does nothing if not attached.
    pub fn notify_detached(&self) {
        let mut state = self.inner.state.lock();
        if !state.attached {
            return;
        }
        state.attached = false;
        self.inner.detach_all(&mut state);
        tracing::debug!(
            target: targets::TABLE,
            table = %self.inner.config.name,
            rows = state.rows.len(),
            "detached"
        );
    }

    /// Detaches whatever is still attached, releases every widget and stops
    /// following the list.
    pub fn unbind(&self) {
        let connection = {
            let mut state = self.inner.state.lock();
            if !state.bound {
                return;
            }
            state.bound = false;
            if state.attached {
                state.attached = false;
                self.inner.detach_all(&mut state);
            }
            state.rows.clear();
            state.header = None;
            state.footer = None;
            state.connection.take()
        };
        if let Some(id) = connection {
            self.inner.list.changes().disconnect(id);
        }
        tracing::debug!(target: targets::TABLE, table = %self.inner.config.name, "unbound");
    }
}

impl<T, R: RowRenderer<T>> Drop for TableRenderer<T, R> {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl<T, R: RowRenderer<T>> TableInner<T, R> {
    fn attach_all(&self, state: &mut TableState<T, R::Widget>) {
        if let Some(header) = state.header.as_mut()
            && !header.attached
        {
            self.renderer.on_attach_header(&mut header.widget);
            header.attached = true;
        }
        for row in state.rows.iter_mut() {
            if row.state == RowState::Rendered {
                self.renderer.on_attach(&row.item, &mut row.widget);
                row.state = RowState::Attached;
            }
        }
        if let Some(footer) = state.footer.as_mut()
            && !footer.attached
        {
            self.renderer.on_attach_footer(&mut footer.widget);
            footer.attached = true;
        }
    }

    fn detach_all(&self, state: &mut TableState<T, R::Widget>) {
        if let Some(footer) = state.footer.as_mut()
            && footer.attached
        {
            self.renderer.on_detach_footer(&mut footer.widget);
            footer.attached = false;
        }
        for row in state.rows.iter_mut() {
            if row.state == RowState::Attached {
                self.renderer.on_detach(&row.item, &mut row.widget);
                row.state = RowState::Rendered;
            }
        }
        if let Some(header) = state.header.as_mut()
            && header.attached
        {
            self.renderer.on_detach_header(&mut header.widget);
            header.attached = false;
        }
    }

    fn violation(&self, event: &ListEvent, rows: usize) -> ! {
        tracing::error!(
            target: targets::TABLE,
            table = %self.config.name,
            ?event,
            rows,
            "list fired an out-of-range event"
        );
        panic!(
            "table {:?} received out-of-range event {:?} ({} rows)",
            self.config.name, event, rows
        );
    }
}

impl<T, R> TableInner<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: RowRenderer<T>,
{
    fn fetch(&self, event: &ListEvent, index: usize, rows: usize) -> T {
        self.list
            .get(index)
            .unwrap_or_else(|| self.violation(event, rows))
    }

    fn on_list_event(&self, event: &ListEvent) {
        let mut state = self.state.lock();
        if !state.bound || event.is_empty() {
            return;
        }
        let rows = state.rows.len();
        tracing::trace!(
            target: targets::TABLE,
            table = %self.config.name,
            kind = ?event.kind,
            start = event.start,
            end = event.end,
            "list event"
        );
        match event.kind {
            ListEventKind::Added => {
                if event.start > rows {
                    self.violation(event, rows);
                }
                let attached = state.attached;
                let fresh: Vec<RenderRow<T, R::Widget>> = event
                    .range()
                    .map(|index| {
                        let item = self.fetch(event, index, rows);
                        let mut widget = self.renderer.render(&item);
                        let lifecycle = if attached {
                            self.renderer.on_attach(&item, &mut widget);
                            RowState::Attached
                        } else {
                            RowState::Rendered
                        };
                        RenderRow {
                            item,
                            widget,
                            state: lifecycle,
                        }
                    })
                    .collect();
                state.rows.splice(event.start..event.start, fresh);
            }
            ListEventKind::Removed => {
                if event.end > rows {
                    self.violation(event, rows);
                }
                let removed: Vec<RenderRow<T, R::Widget>> = state.rows.drain(event.range()).collect();
                for mut row in removed {
                    if row.state == RowState::Attached {
                        self.renderer.on_detach(&row.item, &mut row.widget);
                    }
                }
            }
            ListEventKind::Changed => {
                if event.end > rows {
                    self.violation(event, rows);
                }
                let attached = state.attached;
                for index in event.range() {
                    let item = self.fetch(event, index, rows);
                    let row = &mut state.rows[index];
                    if self.renderer.update(&item, &mut row.widget) {
                        row.item = item;
                        continue;
                    }
                    if row.state == RowState::Attached {
                        self.renderer.on_detach(&row.item, &mut row.widget);
                    }
                    let mut widget = self.renderer.render(&item);
                    let lifecycle = if attached {
                        self.renderer.on_attach(&item, &mut widget);
                        RowState::Attached
                    } else {
                        RowState::Rendered
                    };
                    *row = RenderRow {
                        item,
                        widget,
                        state: lifecycle,
                    };
                }
            }
        }
    }
}
