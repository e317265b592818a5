use phf::phf_map;

// "Live" flow: the classic consumers-tenant device-code endpoint, same client
// registration shape the teacher used for its single-account Minecraft login.
pub(crate) const LIVE_CLIENT_ID: (&str, &str) = ("client_id", "94fd28d0-faa6-4d85-920d-69a2abe16bcd");
pub(crate) const LIVE_DEVICE_CODE_URL: &str =
    "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";
pub(crate) const LIVE_TOKEN_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";

// "MSAL" flow: the common-tenant endpoint used by the Microsoft identity
// platform libraries, registered under a separate first-party client id.
pub(crate) const MSAL_CLIENT_ID: (&str, &str) = ("client_id", "00000000-0000-0000-0000-000000402b5b");
pub(crate) const MSAL_DEVICE_CODE_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/devicecode";
pub(crate) const MSAL_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

pub(crate) const DEVICE_CODE_GRANT_TYPE: (&str, &str) =
    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code");

pub const XBOX_LIVE_AUTHENTICATE_URL: &str = "https://user.auth.xboxlive.com/user/authenticate";
pub const DEVICE_AUTHENTICATE_URL: &str = "https://device.auth.xboxlive.com/device/authenticate";
pub const TITLE_AUTHENTICATE_URL: &str = "https://title.auth.xboxlive.com/title/authenticate";
pub const XSTS_AUTHENTICATE_URL: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";

pub const XBOX_LIVE_RELYING_PARTY: &str = "http://auth.xboxlive.com";
pub const REALMS_RELYING_PARTY: &str = "https://pocket.realms.minecraft.net/";
pub const MINECRAFT_RELYING_PARTY: &str = "rp://api.minecraftservices.com/";

pub const XSTS_USER_AGENT: &str = "XboxServicesAPI/2021.11.20201204.000 c";

pub const MIN_XSTS_TOKEN_LEN: usize = 100;
pub const MIN_ID_LEN: usize = 10;

pub static XERR_HINTS: phf::Map<&'static str, &'static str> = phf_map! {
    "2148916233" => "The account doesn't have an Xbox Live profile and must sign in at xbox.com once before it can be used here.",
    "2148916235" => "Xbox Live is not available in this account's country/region.",
    "2148916236" => "The account needs adult verification (South Korea).",
    "2148916237" => "The account needs adult verification (South Korea).",
    "2148916238" => "The account is a child account and must be added to a Microsoft Family by an adult before it can sign in.",
};

pub(crate) fn is_permanent_xerr(xerr: &str) -> bool {
    matches!(xerr, "2148916233" | "2148916238")
}
