use std::ops::Deref;
use std::sync::Arc;

use derive_new::new;

use crate::engine::ViewTracker;

#[derive(Debug, new)]
pub struct App<S> {
    pub tracker: Arc<ViewTracker<S>>,
}

impl<S> Clone for App<S> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
        }
    }
}

impl<S> Deref for App<S> {
    type Target = ViewTracker<S>;

    fn deref(&self) -> &Self::Target {
        &self.tracker
    }
}
