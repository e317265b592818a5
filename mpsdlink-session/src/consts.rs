pub const MPSD_BASE: &str = "https://sessiondirectory.xboxlive.com";
pub const SERVICE_CONFIG_ID: &str = "4fc10100-5f7a-4470-899b-280835760c07";
pub const SESSION_TEMPLATE: &str = "MinecraftLobby";
pub const MPSD_CONTRACT_VERSION: &str = "107";
pub const TITLE_ID: u64 = 1_739_947_436;
