//! Ring routing state.
//!
//! Each node keeps a [`FingerTable`] for logarithmic routing and a
//! [`RingView`] layering full-membership knowledge, the predecessor pointer
//! and the successor list on top of it.

pub mod finger;
pub mod view;

pub use finger::FingerTable;
pub use view::RingView;
