pub mod choice;
pub mod dispatch;
pub mod interp;
pub mod scope;
pub mod script;
pub mod section;
pub mod story;
