pub const EVOWARE_DISPLAY_VERSION: &str = env!("EVOWARE_DISPLAY_VERSION");
pub const EVOWARE_BUILD_N: &str = env!("EVOWARE_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "evoware {}\nBuild {}\nTecan Evoware worklist generator",
        EVOWARE_DISPLAY_VERSION, EVOWARE_BUILD_N
    )
}
