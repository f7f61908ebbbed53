pub(crate) mod directory;
pub(crate) mod identity;
pub(crate) mod mail;
pub(crate) mod notebook;
pub(crate) mod report;
