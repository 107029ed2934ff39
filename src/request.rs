//! Protocol-neutral request and response shapes.
//!
//! Requests name each tag so that responses can be looked up by the same
//! name. The tag type is generic: S7 requests carry [`S7Tag`](crate::s7::S7Tag)s,
//! Modbus requests carry [`ModbusTag`](crate::modbus::ModbusTag)s.
//!
//! | Request | Response | Per-item result |
//! |---------|----------|-----------------|
//! | [`ReadRequest`] | [`ReadResponse`] | code + value |
//! | [`WriteRequest`] | [`WriteResponse`] | code |
//! | [`BrowseRequest`] | [`BrowseResponse`] | code + found items |
//! | [`SubscriptionRequest`] | [`SubscriptionEvent`] | code + value |
//!
//! # Example
//!
//! ```
//! use plc_wire::s7::S7Tag;
//! use plc_wire::{PlcResponseCode, PlcValue, ReadRequest, ReadResponse};
//!
//! let request = ReadRequest::builder()
//!     .add_tag("speed", "%DB1.DBW0:INT".parse::<S7Tag>().unwrap())
//!     .build()
//!     .unwrap();
//! assert_eq!(request.tag_names(), vec!["speed"]);
//!
//! let response = ReadResponse::from_items(&request.tag_names(), vec![(PlcResponseCode::Ok, PlcValue::Int(42))]).unwrap();
//! assert_eq!(response.value("speed"), Some(&PlcValue::Int(42)));
//! ```

use std::fmt;
use std::time::{Duration, SystemTime};

use crate::error::{CodecError, Result};
use crate::plc_value::PlcValue;

/// Outcome of one item of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlcResponseCode {
    /// The item was processed.
    Ok,
    /// The addressed object does not exist.
    NotFound,
    /// The device refused access.
    AccessDenied,
    /// The address is out of range for the device.
    InvalidAddress,
    /// The data type does not match the object.
    InvalidDatatype,
    /// The value could not be used.
    InvalidData,
    /// The device or the driver failed internally.
    InternalError,
    /// The device is busy; retry later.
    RemoteBusy,
    /// The device reported an error.
    RemoteError,
    /// The operation is not supported.
    Unsupported,
}

impl PlcResponseCode {
    /// Returns `true` for [`PlcResponseCode::Ok`].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for PlcResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::InvalidDatatype => "INVALID_DATATYPE",
            Self::InvalidData => "INVALID_DATA",
            Self::InternalError => "INTERNAL_ERROR",
            Self::RemoteBusy => "REMOTE_BUSY",
            Self::RemoteError => "REMOTE_ERROR",
            Self::Unsupported => "UNSUPPORTED",
        };
        f.write_str(name)
    }
}

/// Result of one read or subscription item.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResponseItem {
    /// Item outcome.
    pub code: PlcResponseCode,
    /// Decoded value; [`PlcValue::Null`] unless the code is `Ok`.
    pub value: PlcValue,
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = Vec::new();
    for name in names {
        if seen.contains(&name) {
            return Err(CodecError::invalid_parameter(name, "tag name used twice"));
        }
        seen.push(name);
    }
    Ok(())
}

fn zip_names<T>(names: &[&str], items: Vec<T>) -> Result<Vec<(String, T)>> {
    if names.len() != items.len() {
        return Err(CodecError::invalid_frame(
            "response",
            format!("{} items for {} tags", items.len(), names.len()),
        ));
    }
    Ok(names.iter().map(|n| n.to_string()).zip(items).collect())
}

/// Named tags to read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest<T> {
    tags: Vec<(String, T)>,
}

impl<T> ReadRequest<T> {
    /// Starts an empty request.
    pub fn builder() -> ReadRequestBuilder<T> {
        ReadRequestBuilder { tags: Vec::new() }
    }

    /// Tag names in insertion order.
    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Looks up a tag by name.
    pub fn tag(&self, name: &str) -> Option<&T> {
        self.tags.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Tags in insertion order.
    pub fn tags(&self) -> impl Iterator<Item = &T> {
        self.tags.iter().map(|(_, t)| t)
    }
}

/// Builder for [`ReadRequest`].
#[derive(Debug, Clone)]
pub struct ReadRequestBuilder<T> {
    tags: Vec<(String, T)>,
}

impl<T> ReadRequestBuilder<T> {
    /// Adds a named tag.
    pub fn add_tag(mut self, name: &str, tag: T) -> Self {
        self.tags.push((name.to_string(), tag));
        self
    }

    /// Finishes the request; tag names must be unique.
    pub fn build(self) -> Result<ReadRequest<T>> {
        check_unique(self.tags.iter().map(|(n, _)| n.as_str()))?;
        Ok(ReadRequest { tags: self.tags })
    }
}

/// Named tags with the values to write to them.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest<T> {
    items: Vec<(String, T, PlcValue)>,
}

impl<T> WriteRequest<T> {
    /// Starts an empty request.
    pub fn builder() -> WriteRequestBuilder<T> {
        WriteRequestBuilder { items: Vec::new() }
    }

    /// Tag names in insertion order.
    pub fn tag_names(&self) -> Vec<&str> {
        self.items.iter().map(|(n, _, _)| n.as_str()).collect()
    }

    /// Looks up a tag by name.
    pub fn tag(&self, name: &str) -> Option<&T> {
        self.items.iter().find(|(n, _, _)| n == name).map(|(_, t, _)| t)
    }

    /// Looks up the value to write by tag name.
    pub fn value(&self, name: &str) -> Option<&PlcValue> {
        self.items.iter().find(|(n, _, _)| n == name).map(|(_, _, v)| v)
    }

    /// Tags and values in insertion order.
    pub fn items(&self) -> impl Iterator<Item = (&T, &PlcValue)> {
        self.items.iter().map(|(_, t, v)| (t, v))
    }
}

/// Builder for [`WriteRequest`].
#[derive(Debug, Clone)]
pub struct WriteRequestBuilder<T> {
    items: Vec<(String, T, PlcValue)>,
}

impl<T> WriteRequestBuilder<T> {
    /// Adds a named tag and its value.
    pub fn add_tag(mut self, name: &str, tag: T, value: impl Into<PlcValue>) -> Self {
        self.items.push((name.to_string(), tag, value.into()));
        self
    }

    /// Finishes the request; tag names must be unique.
    pub fn build(self) -> Result<WriteRequest<T>> {
        check_unique(self.items.iter().map(|(n, _, _)| n.as_str()))?;
        Ok(WriteRequest { items: self.items })
    }
}

/// How a subscribed tag is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    /// Sampled at a fixed interval.
    Cyclic(Duration),
    /// Reported whenever the value changes.
    ChangeOfState,
    /// Reported when the device raises an event.
    Event,
}

/// Named tags to be notified about.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest<T> {
    tags: Vec<(String, T, SubscriptionType)>,
}

impl<T> SubscriptionRequest<T> {
    /// Starts an empty request.
    pub fn builder() -> SubscriptionRequestBuilder<T> {
        SubscriptionRequestBuilder { tags: Vec::new() }
    }

    /// Tag names in insertion order.
    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|(n, _, _)| n.as_str()).collect()
    }

    /// Looks up a tag and its subscription type by name.
    pub fn tag(&self, name: &str) -> Option<(&T, SubscriptionType)> {
        self.tags.iter().find(|(n, _, _)| n == name).map(|(_, t, s)| (t, *s))
    }
}

/// Builder for [`SubscriptionRequest`].
#[derive(Debug, Clone)]
pub struct SubscriptionRequestBuilder<T> {
    tags: Vec<(String, T, SubscriptionType)>,
}

impl<T> SubscriptionRequestBuilder<T> {
    /// Adds a tag sampled every `interval`.
    pub fn add_cyclic_tag(self, name: &str, tag: T, interval: Duration) -> Self {
        self.add(name, tag, SubscriptionType::Cyclic(interval))
    }

    /// Adds a tag reported on every change.
    pub fn add_change_of_state_tag(self, name: &str, tag: T) -> Self {
        self.add(name, tag, SubscriptionType::ChangeOfState)
    }

    /// Adds a tag reported on device events.
    pub fn add_event_tag(self, name: &str, tag: T) -> Self {
        self.add(name, tag, SubscriptionType::Event)
    }

    fn add(mut self, name: &str, tag: T, kind: SubscriptionType) -> Self {
        self.tags.push((name.to_string(), tag, kind));
        self
    }

    /// Finishes the request; tag names must be unique.
    pub fn build(self) -> Result<SubscriptionRequest<T>> {
        check_unique(self.tags.iter().map(|(n, _, _)| n.as_str()))?;
        Ok(SubscriptionRequest { tags: self.tags })
    }
}

/// Named address queries for browsing a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRequest {
    queries: Vec<(String, String)>,
}

impl BrowseRequest {
    /// Starts an empty request.
    pub fn builder() -> BrowseRequestBuilder {
        BrowseRequestBuilder { queries: Vec::new() }
    }

    /// Query names in insertion order.
    pub fn tag_names(&self) -> Vec<&str> {
        self.queries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Looks up a query by name.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.queries.iter().find(|(n, _)| n == name).map(|(_, q)| q.as_str())
    }
}

/// Builder for [`BrowseRequest`].
#[derive(Debug, Clone)]
pub struct BrowseRequestBuilder {
    queries: Vec<(String, String)>,
}

impl BrowseRequestBuilder {
    /// Adds a named query, e.g. an address prefix.
    pub fn add_query(mut self, name: &str, query: &str) -> Self {
        self.queries.push((name.to_string(), query.to_string()));
        self
    }

    /// Finishes the request; query names must be unique.
    pub fn build(self) -> Result<BrowseRequest> {
        check_unique(self.queries.iter().map(|(n, _)| n.as_str()))?;
        Ok(BrowseRequest { queries: self.queries })
    }
}

/// Results of a [`ReadRequest`], by tag name.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    items: Vec<(String, ResponseItem)>,
}

impl ReadResponse {
    /// Pairs decoded items with the request's tag names.
    ///
    /// Fails with `InvalidFrame` when the counts differ.
    pub fn from_items(names: &[&str], items: Vec<(PlcResponseCode, PlcValue)>) -> Result<Self> {
        let items = items
            .into_iter()
            .map(|(code, value)| ResponseItem { code, value })
            .collect();
        Ok(Self {
            items: zip_names(names, items)?,
        })
    }

    /// Tag names in request order.
    pub fn tag_names(&self) -> Vec<&str> {
        self.items.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Full result of one tag.
    pub fn item(&self, name: &str) -> Option<&ResponseItem> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, i)| i)
    }

    /// Outcome of one tag.
    pub fn response_code(&self, name: &str) -> Option<PlcResponseCode> {
        self.item(name).map(|i| i.code)
    }

    /// Value of one tag; `None` for unknown names.
    pub fn value(&self, name: &str) -> Option<&PlcValue> {
        self.item(name).map(|i| &i.value)
    }
}

/// Results of a [`WriteRequest`], by tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    codes: Vec<(String, PlcResponseCode)>,
}

impl WriteResponse {
    /// Pairs item codes with the request's tag names.
    pub fn from_codes(names: &[&str], codes: Vec<PlcResponseCode>) -> Result<Self> {
        Ok(Self {
            codes: zip_names(names, codes)?,
        })
    }

    /// Tag names in request order.
    pub fn tag_names(&self) -> Vec<&str> {
        self.codes.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Outcome of one tag.
    pub fn response_code(&self, name: &str) -> Option<PlcResponseCode> {
        self.codes.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    /// Returns `true` when every item succeeded.
    pub fn all_ok(&self) -> bool {
        self.codes.iter().all(|(_, c)| c.is_ok())
    }
}

/// One object found while browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BrowseItem {
    /// Address usable as a tag.
    pub address: String,
    /// Symbolic name.
    pub name: String,
    /// Whether the object can be read.
    pub readable: bool,
    /// Whether the object can be written.
    pub writable: bool,
}

/// Results of a [`BrowseRequest`], by query name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseResponse {
    results: Vec<(String, PlcResponseCode, Vec<BrowseItem>)>,
}

impl BrowseResponse {
    /// Pairs per-query results with the request's query names.
    pub fn from_results(names: &[&str], results: Vec<(PlcResponseCode, Vec<BrowseItem>)>) -> Result<Self> {
        let results = zip_names(names, results)?
            .into_iter()
            .map(|(n, (code, items))| (n, code, items))
            .collect();
        Ok(Self { results })
    }

    /// Query names in request order.
    pub fn tag_names(&self) -> Vec<&str> {
        self.results.iter().map(|(n, _, _)| n.as_str()).collect()
    }

    /// Outcome of one query.
    pub fn response_code(&self, name: &str) -> Option<PlcResponseCode> {
        self.results.iter().find(|(n, _, _)| n == name).map(|(_, c, _)| *c)
    }

    /// Objects found by one query.
    pub fn items(&self, name: &str) -> &[BrowseItem] {
        self.results
            .iter()
            .find(|(n, _, _)| n == name)
            .map_or(&[], |(_, _, items)| items.as_slice())
    }
}

/// A notification delivered for a [`SubscriptionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEvent {
    /// When the values were sampled.
    pub timestamp: SystemTime,
    items: Vec<(String, ResponseItem)>,
}

impl SubscriptionEvent {
    /// Creates an event from named values.
    pub fn new(timestamp: SystemTime, items: Vec<(String, PlcResponseCode, PlcValue)>) -> Self {
        Self {
            timestamp,
            items: items
                .into_iter()
                .map(|(n, code, value)| (n, ResponseItem { code, value }))
                .collect(),
        }
    }

    /// Tag names carried by the event.
    pub fn tag_names(&self) -> Vec<&str> {
        self.items.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Outcome of one tag.
    pub fn response_code(&self, name: &str) -> Option<PlcResponseCode> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, i)| i.code)
    }

    /// Value of one tag.
    pub fn value(&self, name: &str) -> Option<&PlcValue> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, i)| &i.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_builder() {
        let request = ReadRequest::builder().add_tag("a", 1u16).add_tag("b", 2u16).build().unwrap();
        assert_eq!(request.tag_names(), vec!["a", "b"]);
        assert_eq!(request.tag("b"), Some(&2));
        assert_eq!(request.tag("c"), None);
        assert_eq!(request.tags().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ReadRequest::builder().add_tag("a", 1u16).add_tag("a", 2u16).build();
        assert!(matches!(result, Err(CodecError::InvalidParameter { .. })));

        let result = BrowseRequest::builder().add_query("q", "%DB1").add_query("q", "%M").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_write_request_values() {
        let request = WriteRequest::builder()
            .add_tag("flag", 0u8, true)
            .add_tag("speed", 1u8, 1500i16)
            .build()
            .unwrap();
        assert_eq!(request.value("flag"), Some(&PlcValue::Bool(true)));
        assert_eq!(request.value("speed"), Some(&PlcValue::Int(1500)));
        assert_eq!(request.items().count(), 2);
    }

    #[test]
    fn test_read_response_lookup() {
        let response = ReadResponse::from_items(
            &["a", "b"],
            vec![
                (PlcResponseCode::Ok, PlcValue::Bool(true)),
                (PlcResponseCode::AccessDenied, PlcValue::Null),
            ],
        )
        .unwrap();
        assert_eq!(response.response_code("b"), Some(PlcResponseCode::AccessDenied));
        assert_eq!(response.value("b"), Some(&PlcValue::Null));
        assert_eq!(response.value("missing"), None);
    }

    #[test]
    fn test_count_mismatch() {
        let result = ReadResponse::from_items(&["a", "b"], vec![(PlcResponseCode::Ok, PlcValue::Null)]);
        assert!(matches!(result, Err(CodecError::InvalidFrame { .. })));
        assert!(WriteResponse::from_codes(&["a"], Vec::new()).is_err());
    }

    #[test]
    fn test_write_response() {
        let response =
            WriteResponse::from_codes(&["a", "b"], vec![PlcResponseCode::Ok, PlcResponseCode::Ok]).unwrap();
        assert!(response.all_ok());
        let response =
            WriteResponse::from_codes(&["a", "b"], vec![PlcResponseCode::Ok, PlcResponseCode::RemoteBusy]).unwrap();
        assert!(!response.all_ok());
        assert_eq!(response.response_code("b").map(|c| c.to_string()).as_deref(), Some("REMOTE_BUSY"));
    }

    #[test]
    fn test_subscription_and_browse() {
        let request = SubscriptionRequest::builder()
            .add_cyclic_tag("fast", "%MW0:WORD", Duration::from_millis(100))
            .add_change_of_state_tag("door", "%I0.0:BOOL")
            .build()
            .unwrap();
        assert_eq!(request.tag("fast").map(|(_, s)| s), Some(SubscriptionType::Cyclic(Duration::from_millis(100))));

        let event = SubscriptionEvent::new(
            SystemTime::UNIX_EPOCH,
            vec![("door".to_string(), PlcResponseCode::Ok, PlcValue::Bool(false))],
        );
        assert_eq!(event.value("door"), Some(&PlcValue::Bool(false)));

        let item = BrowseItem {
            address: "%DB1.DBW0:INT".to_string(),
            name: "speed".to_string(),
            readable: true,
            writable: false,
        };
        let browse = BrowseResponse::from_results(&["db1"], vec![(PlcResponseCode::Ok, vec![item])]).unwrap();
        assert_eq!(browse.items("db1").len(), 1);
        assert!(browse.items("other").is_empty());
    }
}
