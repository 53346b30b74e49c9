//! Identity resolution primitives: label normalization, per-entity selector
//! sets, scope lookup and entity resolution.

pub mod normalize;
pub mod resolver;
pub mod scopes;
pub mod selectors;
