//! CLI arguments and server configuration defaults.

use clap::Parser;

pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 0;
pub const ALLOWED_MIME_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
pub const MAX_SANITIZED_NAME_LEN: usize = 200;
pub const MAX_PUBLISH_ATTEMPTS: usize = 8;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "upload-intake", version, about = "Image upload intake server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "INTAKE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "INTAKE_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 'd',
        long,
        env = "INTAKE_UPLOAD_DIR",
        default_value = DEFAULT_UPLOAD_DIR,
        help = "Directory uploaded files are written to"
    )]
    pub upload_dir: String,
    #[arg(
        long,
        env = "INTAKE_CLEAR_ON_UPLOAD",
        default_value_t = false,
        help = "Remove everything in the upload directory before each upload"
    )]
    pub clear_on_upload: bool,
    #[arg(
        long,
        env = "INTAKE_MAX_FILE_SIZE",
        default_value_t = DEFAULT_MAX_FILE_SIZE,
        help = "Max size of a single uploaded file in bytes (0 to disable)"
    )]
    pub max_file_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_clear_on_upload_off() {
        let args = Args::try_parse_from(["upload-intake"]).expect("parse defaults");
        assert!(!args.clear_on_upload);
        assert_eq!(args.upload_dir, DEFAULT_UPLOAD_DIR);
        assert_eq!(args.port, DEFAULT_HTTP_PORT);
        assert_eq!(args.max_file_size, 0);
    }

    #[test]
    fn clear_on_upload_is_opt_in_flag() {
        let args = Args::try_parse_from(["upload-intake", "--clear-on-upload", "-d", "/tmp/in"])
            .expect("parse flags");
        assert!(args.clear_on_upload);
        assert_eq!(args.upload_dir, "/tmp/in");
    }
}
