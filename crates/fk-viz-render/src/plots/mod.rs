pub mod overlay;
pub mod profile;

mod axes_draw;
