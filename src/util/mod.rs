pub mod buf_ext;
pub mod random;
pub mod safe_converter;
pub mod var_field;
