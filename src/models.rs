use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Catalog section grouping products (e.g. "Mobiliario", "Iluminación").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub image: Option<String>, // path into the blob store, NULL if none
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog product. Belongs to a section; deleting the section cascades here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    // `folderId` is the historical name of this foreign key; archives written
    // before the rename still carry it.
    #[serde(alias = "folderId")]
    pub section_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub rent_price: f64,
    pub image: Option<String>,
    #[serde(default)]
    pub image_secondary1: Option<String>,
    #[serde(default)]
    pub image_secondary2: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A design canvas. The design itself is a [`CanvasPayload`] persisted as a
/// JSON string and validated at the store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Canvas {
    pub id: String,
    pub name: String,
    /// Serialized [`CanvasPayload`]. Older archives stored this as an inline
    /// JSON object rather than a string; both shapes are accepted on read.
    #[serde(with = "canvas_data")]
    pub data: String,
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Typed shape of [`Canvas::data`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasPayload {
    #[serde(default)]
    pub images: Vec<PlacedImage>,
    #[serde(default)]
    pub settings: CanvasSettings,
}

impl CanvasPayload {
    /// Parses a serialized payload, rejecting malformed shapes instead of
    /// optional-chaining around them.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Payload(format!("canvas design payload: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }
}

/// One image placed on a canvas: a blob-store source plus its transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedImage {
    pub id: String,
    /// Blob path. Nulled when the underlying file has gone missing.
    pub source: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSettings {
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default = "default_canvas_dimension")]
    pub width: f64,
    #[serde(default = "default_canvas_dimension")]
    pub height: f64,
    #[serde(default)]
    pub show_grid: bool,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            background_color: None,
            width: default_canvas_dimension(),
            height: default_canvas_dimension(),
            show_grid: false,
        }
    }
}

fn default_canvas_dimension() -> f64 {
    1080.0
}

/// Ledger entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Sale,
    Rental,
    Decoration,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Rental => "rental",
            Self::Decoration => "decoration",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "sale" => Ok(Self::Sale),
            "rental" => Ok(Self::Rental),
            "decoration" => Ok(Self::Decoration),
            other => Err(Error::Database(format!("Unknown transaction kind: {other}"))),
        }
    }
}

/// A sale, rental, or decoration booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub discount: f64,
    pub total_amount: f64,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub client_data: ClientInfo,
    #[serde(default)]
    pub notes: Option<String>,
    pub date: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub is_installment: bool,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default)]
    pub amount_paid: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_quantity() -> i64 {
    1
}

/// Free-form contact details attached to a transaction or quotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl ClientInfo {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Payload(format!("client data: {e}")))
    }
}

/// One line of a multi-item transaction or quotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default)]
    pub product_id: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    #[serde(default)]
    pub subtotal: f64,
}

pub fn parse_line_items(raw: &str) -> Result<Vec<LineItem>> {
    serde_json::from_str(raw).map_err(|e| Error::Payload(format!("line items: {e}")))
}

/// 1:1 side record for rental and decoration transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalDetail {
    pub transaction_id: String,
    pub status: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub deposit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: f64,
    pub date: String,
    #[serde(default)]
    pub receipt_image: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotationStatus {
    Pending,
    Converted,
}

impl QuotationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Converted => "converted",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "converted" => Ok(Self::Converted),
            other => Err(Error::Database(format!("Unknown quotation status: {other}"))),
        }
    }
}

/// A quotation; convertible into a [`Transaction`] once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quotation {
    pub id: String,
    pub quotation_number: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub discount: f64,
    pub total_amount: f64,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub client_data: ClientInfo,
    #[serde(default)]
    pub notes: Option<String>,
    pub date: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub status: QuotationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedReport {
    pub id: String,
    pub title: String,
    pub kind: String,
    #[serde(default)]
    pub period_start: Option<String>,
    #[serde(default)]
    pub period_end: Option<String>,
    /// Opaque report snapshot, stored as JSON text.
    pub data: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub date: String,
}

/// `meta.json` at the archive root: what the importer sanity-checks before
/// any destructive step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    pub app_name: String,
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub counts: BTreeMap<String, usize>,
}

/// Serde helper for [`Canvas::data`]: always serializes as a JSON string,
/// accepts either a string or an inline object on deserialization.
mod canvas_data {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(s),
            object @ serde_json::Value::Object(_) => {
                serde_json::to_string(&object).map_err(D::Error::custom)
            }
            other => Err(D::Error::custom(format!(
                "canvas data must be a JSON string or object, got {other}"
            ))),
        }
    }
}
