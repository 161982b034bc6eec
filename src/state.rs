use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Fpv,
    Orbit,
}

impl ViewMode {
    pub fn label(self) -> &'static str {
        match self {
            ViewMode::Fpv => "FPV",
            ViewMode::Orbit => "ORBIT",
        }
    }
}

/// World snapshot every component reads and writes through [`SharedState`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub current_node: Option<String>,
    pub outgoing_node: Option<String>,
    pub view_mode: ViewMode,
    /// Navigation lock. While true no new navigation is accepted.
    pub is_navigating: bool,
    pub zoom_level: f32,
    pub debug_mode: bool,
    pub hovered_marker: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            current_node: None,
            outgoing_node: None,
            view_mode: ViewMode::default(),
            is_navigating: false,
            zoom_level: 20.0,
            debug_mode: false,
            hovered_marker: None,
        }
    }
}

/// Shallow-merge partial for [`SharedState::set`]. `None` fields are left
/// untouched; `hovered_marker` is doubly optional so hover can be cleared.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub current_node: Option<String>,
    pub outgoing_node: Option<String>,
    pub view_mode: Option<ViewMode>,
    pub is_navigating: Option<bool>,
    pub zoom_level: Option<f32>,
    pub debug_mode: Option<bool>,
    pub hovered_marker: Option<Option<String>>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.current_node.is_none()
            && self.outgoing_node.is_none()
            && self.view_mode.is_none()
            && self.is_navigating.is_none()
            && self.zoom_level.is_none()
            && self.debug_mode.is_none()
            && self.hovered_marker.is_none()
    }
}

type Subscriber = Box<dyn Fn(&Snapshot)>;

/// The single mutable record shared by all viewer components. Every `set`
/// merges a partial and synchronously notifies subscribers in registration
/// order. A `set` issued from inside a notification pass is queued and
/// applied after the pass completes, so notification depth never exceeds one.
pub struct SharedState {
    snapshot: RefCell<Snapshot>,
    subscribers: RefCell<Vec<Subscriber>>,
    notifying: Cell<bool>,
    deferred: RefCell<VecDeque<StateUpdate>>,
}

pub type StateHandle = Rc<SharedState>;

impl SharedState {
    pub fn new(snapshot: Snapshot) -> StateHandle {
        Rc::new(Self {
            snapshot: RefCell::new(snapshot),
            subscribers: RefCell::new(Vec::new()),
            notifying: Cell::new(false),
            deferred: RefCell::new(VecDeque::new()),
        })
    }

    pub fn get(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribers run synchronously on every `set`. They may call `set`
    /// themselves (the update is deferred) but must not call `subscribe`.
    pub fn subscribe(&self, subscriber: impl Fn(&Snapshot) + 'static) {
        self.subscribers.borrow_mut().push(Box::new(subscriber));
    }

    pub fn set(&self, update: StateUpdate) {
        if update.is_empty() {
            return;
        }
        if self.notifying.get() {
            self.deferred.borrow_mut().push_back(update);
            return;
        }
        self.apply(update);
        self.notifying.set(true);
        loop {
            let snapshot = self.snapshot.borrow().clone();
            {
                let subscribers = self.subscribers.borrow();
                for subscriber in subscribers.iter() {
                    subscriber(&snapshot);
                }
            }
            let next = self.deferred.borrow_mut().pop_front();
            match next {
                Some(update) => self.apply(update),
                None => break,
            }
        }
        self.notifying.set(false);
    }

    fn apply(&self, update: StateUpdate) {
        let mut snapshot = self.snapshot.borrow_mut();
        if let Some(current) = update.current_node {
            snapshot.current_node = Some(current);
        }
        if let Some(outgoing) = update.outgoing_node {
            snapshot.outgoing_node = Some(outgoing);
        }
        if let Some(mode) = update.view_mode {
            snapshot.view_mode = mode;
        }
        if let Some(navigating) = update.is_navigating {
            snapshot.is_navigating = navigating;
        }
        if let Some(zoom) = update.zoom_level {
            snapshot.zoom_level = zoom;
        }
        if let Some(debug) = update.debug_mode {
            snapshot.debug_mode = debug;
        }
        if let Some(hovered) = update.hovered_marker {
            snapshot.hovered_marker = hovered;
        }
    }
}
