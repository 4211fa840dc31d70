//! Recording fakes for the downstream sinks, shared by unit tests.
//!
//! The optional sinks run under `catch_unwind`, so a strict mock that panics
//! on an unexpected call would be swallowed. These fakes record every call
//! instead, and tests assert on the recorded counts.

use crate::mapping::ListFields;
use crate::payload::FormResponse;
use crate::sinks::{
    CdpSync, CdpSyncOutcome, ConfirmationEmail, ContactSummary, EmailSender, IntakeSinks,
    ListItem, ListStore, SinkError,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

fn failure(service: &str) -> SinkError {
    SinkError::Status {
        service: service.to_string(),
        status: 503,
        message: "unavailable".to_string(),
    }
}

// ============================================================================
// List store
// ============================================================================

pub struct RecordingListStore {
    calls: Mutex<Vec<(String, ListFields)>>,
    item_id: Option<String>,
}

impl RecordingListStore {
    pub fn succeeding(item_id: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            item_id: Some(item_id.to_string()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            item_id: None,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(String, ListFields)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ListStore for RecordingListStore {
    async fn create_list_item(
        &self,
        list_id: &str,
        fields: &ListFields,
    ) -> Result<ListItem, SinkError> {
        self.calls
            .lock()
            .unwrap()
            .push((list_id.to_string(), fields.clone()));
        match &self.item_id {
            Some(id) => Ok(ListItem { id: id.clone() }),
            None => Err(failure("list-store")),
        }
    }
}

// ============================================================================
// Email sender
// ============================================================================

#[derive(Clone, Copy)]
pub enum EmailBehaviour {
    Sent,
    NotSent,
    Fails,
    Panics,
}

pub struct RecordingEmailSender {
    calls: Mutex<Vec<ConfirmationEmail>>,
    behaviour: EmailBehaviour,
}

impl RecordingEmailSender {
    pub fn new(behaviour: EmailBehaviour) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            behaviour,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<ConfirmationEmail> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_confirmation_email(&self, email: &ConfirmationEmail) -> Result<bool, SinkError> {
        self.calls.lock().unwrap().push(email.clone());
        match self.behaviour {
            EmailBehaviour::Sent => Ok(true),
            EmailBehaviour::NotSent => Ok(false),
            EmailBehaviour::Fails => Err(failure("email")),
            EmailBehaviour::Panics => panic!("email sender exploded"),
        }
    }
}

// ============================================================================
// CDP sync
// ============================================================================

#[derive(Clone)]
pub enum CdpBehaviour {
    Succeeds(CdpSyncOutcome),
    Fails,
    Panics,
}

pub struct RecordingCdpSync {
    calls: Mutex<Vec<(String, String, ContactSummary)>>,
    behaviour: CdpBehaviour,
}

impl RecordingCdpSync {
    pub fn new(behaviour: CdpBehaviour) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            behaviour,
        })
    }

    pub fn succeeding(applicant_id: &str) -> Arc<Self> {
        Self::new(CdpBehaviour::Succeeds(CdpSyncOutcome {
            success: true,
            applicant_id: Some(applicant_id.to_string()),
            flows_triggered: Some(vec!["tryout-welcome".to_string()]),
        }))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Recorded `(response token, list item id, contact)` triples.
    pub fn calls(&self) -> Vec<(String, String, ContactSummary)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CdpSync for RecordingCdpSync {
    async fn sync_applicant(
        &self,
        response: &FormResponse,
        list_item_id: &str,
        contact: &ContactSummary,
    ) -> Result<CdpSyncOutcome, SinkError> {
        self.calls.lock().unwrap().push((
            response.token.clone(),
            list_item_id.to_string(),
            contact.clone(),
        ));
        match &self.behaviour {
            CdpBehaviour::Succeeds(outcome) => Ok(outcome.clone()),
            CdpBehaviour::Fails => Err(failure("cdp")),
            CdpBehaviour::Panics => panic!("cdp sync exploded"),
        }
    }
}

/// Fakes plus the sink bundle built from them.
pub struct FakeSinks {
    pub list_store: Arc<RecordingListStore>,
    pub email: Arc<RecordingEmailSender>,
    pub cdp: Arc<RecordingCdpSync>,
}

impl FakeSinks {
    pub fn new(
        list_store: Arc<RecordingListStore>,
        email: Arc<RecordingEmailSender>,
        cdp: Arc<RecordingCdpSync>,
    ) -> Self {
        Self {
            list_store,
            email,
            cdp,
        }
    }

    /// Every sink succeeds; the list item id is `"42"`.
    pub fn healthy() -> Self {
        Self::new(
            RecordingListStore::succeeding("42"),
            RecordingEmailSender::new(EmailBehaviour::Sent),
            RecordingCdpSync::succeeding("applicant-7"),
        )
    }

    pub fn sinks(&self) -> IntakeSinks {
        IntakeSinks::new(
            self.list_store.clone(),
            self.email.clone(),
            self.cdp.clone(),
        )
    }
}
