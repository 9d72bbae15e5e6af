use std::fmt;

#[derive(Debug)]
pub enum ClinicpadError {
    InvalidFormat,
    UnsupportedFormat { bit_depth: u8, color_type: u8 },
    UnsupportedFilter(u8),
    CorruptHeader,
    Truncated,
    Inflate(String),
    Io(std::io::Error),
}

impl fmt::Display for ClinicpadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClinicpadError::InvalidFormat => write!(f, "invalid image input: not a png"),
            ClinicpadError::UnsupportedFormat {
                bit_depth,
                color_type,
            } => {
                write!(
                    f,
                    "unsupported png format: bit depth {} color type {} (want 8-bit rgba)",
                    bit_depth, color_type
                )
            }
            ClinicpadError::UnsupportedFilter(filter) => {
                write!(f, "unsupported scanline filter: {}", filter)
            }
            ClinicpadError::CorruptHeader => {
                write!(f, "corrupt png header: missing ihdr or zero dimensions")
            }
            ClinicpadError::Truncated => write!(f, "truncated png data"),
            ClinicpadError::Inflate(message) => write!(f, "idat inflate failed: {}", message),
            ClinicpadError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ClinicpadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClinicpadError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClinicpadError {
    fn from(value: std::io::Error) -> Self {
        ClinicpadError::Io(value)
    }
}
