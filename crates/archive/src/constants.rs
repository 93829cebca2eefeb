/// File name suffix identifying an archive part inside a date bucket.
pub const ARCHIVE_PART_SUFFIX: &str = ".tar";
