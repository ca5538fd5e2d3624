pub mod catalog;
pub mod dependents;
pub mod persistence;
pub mod schema;
pub mod scope;
pub mod store;
pub mod table;

pub use catalog::Catalog;
pub use dependents::Dependents;
pub use schema::{
    ColumnAttributes, ColumnDef, ComputedColumn, ComputedValues, Constraint, Dependencies, PixelColumn, Schema,
    SchemaBuilder,
};
pub use scope::{ComputeScope, RowScope};
pub use store::{FrameStore, SharedStore, UpdateOptions};
pub use table::Table;
