//! Route table for the gateway.
//!
//! Holds the ordered (pattern, action) rules loaded at startup and
//! classifies normalized request paths against them.

mod pattern;
mod table;

pub use pattern::{PathPattern, RequestPath, SegmentPattern};
pub use table::{Action, RouteMatch, RouteRule, RouteTable};
