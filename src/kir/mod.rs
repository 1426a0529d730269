//! KIR: a textual form of the graph for writing compiler tests.
//!
//! The format lets tests state graphs directly instead of building them node
//! by node, and lets the output of a pass be compared as text.
//!
//! # KIR Format
//!
//! ```text
//! ; Comments start with semicolon
//! graph name(%a: i32, %b: i32[0, 10], %p: ptr) {
//!   %c = const i32 3
//!   %s = add %a, %c
//!   %addr = address %p, %c
//!   %v = read i64 %addr
//!   write %addr, %s
//!   %t = lt %a, %b
//!   if %t {
//!     return %s
//!   } else {
//!     return %v
//!   }
//! }
//! ```
//!
//! Value definitions (`const`, `add`, `sub`, `mul`, `mulhi`, `and`, `or`,
//! `xor`, `neg`, `not`, `narrow %x, lo, hi`, `address`, `lt`, `eq`) only need
//! to precede their uses. `read`, `write`, `begin`, `if` and `return` form the
//! control chain in textual order.

pub mod check;
pub mod parser;
pub mod printer;

pub use check::{CheckDirective, TestRunner, TestSpec};
pub use parser::{parse_graph, parse_graphs};
pub use printer::print_graph;
