use fieldup_core::AppName;

const S_IXUSR: u32 = 0o100;
const S_IWGRP: u32 = 0o020;
const S_IXGRP: u32 = 0o010;
const S_IROTH: u32 = 0o004;
const S_IWOTH: u32 = 0o002;
const S_IXOTH: u32 = 0o001;

/// Which label a regular file in an app tree receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLabel {
    App,
    ReadProtected,
}

pub fn app_label(prefix: &str, app: &AppName) -> String {
    format!("{prefix}{app}")
}

/// Directory label: the app label followed by the access letters granted to "other".
///
/// Read-only trees never grant `w`, whatever their mode says.
pub fn dir_label(app_label: &str, mode: u32, writeable: bool) -> String {
    let mut label = String::with_capacity(app_label.len() + 3);
    label.push_str(app_label);
    if mode & S_IROTH != 0 {
        label.push('r');
    }
    if writeable && mode & S_IWOTH != 0 {
        label.push('w');
    }
    if mode & S_IXOTH != 0 {
        label.push('x');
    }
    label
}

/// With integrity protection on, only executables and group/other-writeable files keep the
/// app label; everything else is read-protected.
pub fn file_label(mode: u32, integrity_protection: bool) -> FileLabel {
    if !integrity_protection {
        return FileLabel::App;
    }
    if mode & (S_IXUSR | S_IWGRP | S_IXGRP | S_IWOTH | S_IXOTH) != 0 {
        FileLabel::App
    } else {
        FileLabel::ReadProtected
    }
}
