//! Query translation and per-table execution

pub mod operator;
mod result;
pub mod sql;
pub mod translator;

pub use operator::TableOperator;
pub use result::{Assignments, Criteria, Row, Rows, SortSpec};
pub use sql::SqlBuilder;
pub use translator::{
    Filter, Ordering, Pagination, Projection, SortDirection, UpdateSet, build_filter,
    build_pagination, build_projection, build_sort, build_update_set,
};
