/*!
# C-Translation Rules

Structural rewrites aimed at code produced by a C-to-Rust translator:
global state collection, printf-style calls, arithmetic and struct update
cleanups, item housekeeping.
*/

pub mod format_string;
pub mod func_to_macro;
pub mod items;
pub mod static_collect;
pub mod struct_update;
pub mod wrapping_arith;

pub use format_string::ConvertFormatString;
pub use func_to_macro::FuncToMacro;
pub use items::{CreateItem, DeleteItems, InsertPosition, SetMutability, SetVisibility};
pub use static_collect::{StaticCollectToStruct, StaticToLocalRef};
pub use struct_update::{StructAssignToUpdate, StructMergeUpdates};
pub use wrapping_arith::WrappingArithToNormal;
