/// Store endpoints (shared by the purchase and catalog clients)
pub mod store {
    /// Base URL of the store REST API
    pub const API_BASE_URL: &str = "https://api.stickerdom.store/api/v1";
    /// Purchase endpoint, relative to the base URL
    pub const BUY_PATH: &str = "/shop/buy/crypto";
    /// Marker the auth helper embeds in a token it could not mint
    pub const INVALID_TEMP_TOKEN_MARKER: &str = "INVALID_TEMP_TOKEN";
}

/// On-chain amounts, in nano units of the native coin
pub mod chain {
    /// 1 native unit = 1_000_000_000 nano
    pub const NANO_PER_UNIT: u64 = 1_000_000_000;
    /// Padding added to every quoted price to absorb network fees (0.25)
    pub const FEE_BUFFER_NANO: u64 = 250_000_000;
    /// Minimum balance required before an activation transfer (0.05)
    pub const ACTIVATION_RESERVE_NANO: u64 = 50_000_000;
    /// Amount of the self-transfer that deploys a wallet (0.001)
    pub const ACTIVATION_TRANSFER_NANO: u64 = 1_000_000;
    /// Memo attached to the activation self-transfer
    pub const ACTIVATION_MEMO: &str = "wallet activation";
}

/// Chain gateway error texts that mean "wallet not deployed yet"
pub const NOT_ACTIVE_MARKERS: [&str; 4] = [
    "account not found",
    "contract not found",
    "account is not active",
    "exit code",
];
