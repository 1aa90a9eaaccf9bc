//! Microsoft Graph mail API integration
//!
//! This module provides:
//! - A paginated `me/messages` client implementing [`crate::sync::PageFetcher`]
//! - Response normalization to domain models

mod client;
mod normalize;

pub use client::GraphClient;
pub use normalize::normalize_message;

/// Graph API response types
///
/// Every field of a raw message is optional at the serde level so that the
/// normalizer can report exactly which required field is missing.
pub mod api {
    use serde::Deserialize;

    /// One page of `GET /me/messages`
    #[derive(Debug, Deserialize)]
    pub struct MessagePage {
        pub value: Vec<GraphMessage>,
        /// Absolute URL of the next page; absent on the last page
        #[serde(rename = "@odata.nextLink")]
        pub next_link: Option<String>,
    }

    /// Raw message resource
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GraphMessage {
        pub id: Option<String>,
        pub received_date_time: Option<String>,
        pub subject: Option<String>,
        pub body_preview: Option<String>,
        pub body: Option<ItemBody>,
        pub is_read: Option<bool>,
        pub sender: Option<Recipient>,
        pub to_recipients: Option<Vec<Recipient>>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ItemBody {
        pub content: Option<String>,
        pub content_type: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Recipient {
        pub email_address: Option<EmailAddress>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct EmailAddress {
        pub name: Option<String>,
        pub address: Option<String>,
    }
}
