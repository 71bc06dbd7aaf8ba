/// Default OpenAI-compatible backend base URL
pub const DEFAULT_BACKEND_API_BASE_URL: &str = "https://api.devsdocode.com/v1";

/// Prefix the backend expects on provider-qualified model ids
pub const DEFAULT_PROVIDER_PREFIX: &str = "provider-4/";

/// Model used when a chat request omits `model`
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Quota granted to newly registered users (tokens)
pub const DEFAULT_QUOTA: u64 = 500_000;

/// Pricing entry used when neither the external nor the upstream id is priced
pub const DEFAULT_COST_MODEL: &str = "default_model_for_costing";

/// Access tokens look like `access_token_<24 alphanumerics>`
pub const ACCESS_TOKEN_PREFIX: &str = "access_token";

/// API keys look like `user_key_<24 alphanumerics>`
pub const API_KEY_PREFIX: &str = "user_key";

/// Every user holds a single key slot, reported under this id
pub const PRIMARY_KEY_ID: &str = "primary";

/// External model ids that are forwarded as `<provider prefix><id>`
pub static REMAPPED_MODELS: &[&str] = &[
    "gpt-4.1",
    "gpt-4.1-mini",
    "gpt-4.1-nano",
    "gpt-4o",
    "gpt-4o-mini",
    "o3-mini",
    "deepseek-r1",
    "deepseek-v3",
    "llama-4-scout",
    "llama-4-maverick",
    "mistral-large-latest",
    "mistral-small",
    "gemini-2.5-flash-preview-04-17",
    "gemini-2.5-pro-exp-03-25",
];

/// Per-token prices as (model id, input, output), in USD.
/// Ids without a prefix placeholder are matched literally.
/// `{p}` is replaced with the configured provider prefix.
pub static MODEL_COSTS: &[(&str, &str, &str)] = &[
    ("{p}gpt-4.1", "0.00000200", "0.00000800"),
    ("{p}gpt-4.1-mini", "0.00000040", "0.00000160"),
    ("{p}gpt-4.1-nano", "0.00000010", "0.00000040"),
    ("{p}gpt-4o", "0.00000500", "0.00001500"),
    ("{p}gpt-4o-mini", "0.00000015", "0.00000060"),
    // Pricing N/A
    ("{p}o3-mini", "0", "0"),
    ("{p}deepseek-r1", "0.00000800", "0.00000800"),
    // Pricing varies
    ("{p}deepseek-v3", "0", "0"),
    ("{p}llama-4-scout", "0.00000011", "0.00000034"),
    ("{p}llama-4-maverick", "0.00000050", "0.00000077"),
    ("{p}mistral-large-latest", "0.00000800", "0.00002400"),
    ("{p}mistral-small", "0.00000200", "0.00000600"),
    ("{p}gemini-2.5-flash-preview-04-17", "0.00000015", "0.00000060"),
    ("{p}gemini-2.5-pro-exp-03-25", "0.00000125", "0.00001000"),
    ("gpt-3.5-turbo", "0.0000005", "0.0000015"),
    (DEFAULT_COST_MODEL, "0", "0"),
];
