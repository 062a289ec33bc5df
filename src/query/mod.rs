//! Remote query criteria module
//!
//! This module provides the fluent criteria builder used to form read
//! queries against remote task and audit logs.

pub mod builder;

pub use builder::{
    AuditQueryRequest, Combinator, CriteriaSet, QueryBuilder, QueryField, TaskQueryRequest,
    TaskStatus, Term,
};
