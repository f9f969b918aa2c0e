pub mod autodraft;
pub mod order;
pub mod pick;
pub mod room;
pub mod state;
