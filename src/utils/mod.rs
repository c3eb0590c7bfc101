pub mod path_validator;
pub mod secure_fs;
