//! In-memory code IR consumed by the injection engine
//!
//! A [`CodeUnit`] is one loaded class, owning [`Method`]s whose
//! [`MethodBody`] is an ordered list of [`Statement`]s plus exception
//! [`Trap`]s. Statements are addressed by [`Label`], which stays valid
//! across insertions. The bytecode backend exchanges this IR as JSON, one
//! document per unit.
//!
//! # Example
//!
//! ```
//! use covprobe::ir::{MethodBody, Op, IdentitySource, Type};
//!
//! let mut body = MethodBody::new();
//! body.push(Op::Identity {
//!     local: "r0".into(),
//!     source: IdentitySource::This { ty: Type::Object("com.example.Main".into()) },
//! });
//! let ret = body.push(Op::Return { value: None });
//! body.insert_before(Op::Plain { text: "nop".into() }, ret);
//! assert_eq!(body.len(), 3);
//! ```

mod body;
mod statement;
mod types;
mod unit;

pub use body::{LabelError, MethodBody, Trap};
pub use statement::{IdentitySource, Label, Op, Statement, StatementKind};
pub use types::{MethodRef, Type, Value};
pub use unit::{CodeUnit, Method};
