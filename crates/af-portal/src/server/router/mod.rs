pub(crate) mod admin;
pub(crate) mod auth;
pub(crate) mod jupyterlab;
pub(crate) mod profile;
pub(crate) mod public;

/// Path of the group administration page for `group_name`.
pub(crate) fn group_page_path(group_name: &str) -> String {
    format!("/admin/groups/{}", urlencoding::encode(group_name))
}
