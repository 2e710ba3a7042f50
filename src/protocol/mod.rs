pub mod control_code;
pub mod packet;
pub mod stream_type;
