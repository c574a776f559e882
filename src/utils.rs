pub mod csv_export;
pub mod db_utils;
pub mod photo;
