use clap::Parser;

/// Process configuration (§4.2a). Every field is overridable by flag or
/// environment variable so the same binary runs unmodified in a container.
#[derive(Parser, Debug, Clone)]
#[command(name = "dmrswitch-gateway", about = "DMR network routing server")]
pub struct Config {
    #[arg(long, env = "DMRSWITCH_MMDVM_BIND", default_value = "::")]
    pub mmdvm_bind: String,

    #[arg(long, env = "DMRSWITCH_MMDVM_PORT", default_value_t = 62031)]
    pub mmdvm_port: u16,

    #[arg(long, env = "DMRSWITCH_OPENBRIDGE_ENABLED", default_value_t = false)]
    pub openbridge_enabled: bool,

    #[arg(long, env = "DMRSWITCH_OPENBRIDGE_BIND", default_value = "::")]
    pub openbridge_bind: String,

    #[arg(long, env = "DMRSWITCH_OPENBRIDGE_PORT", default_value_t = 62035)]
    pub openbridge_port: u16,

    #[arg(long, env = "DMRSWITCH_IPSC_ENABLED", default_value_t = false)]
    pub ipsc_enabled: bool,

    #[arg(long, env = "DMRSWITCH_IPSC_IP", default_value = "::")]
    pub ipsc_ip: String,

    #[arg(long, env = "DMRSWITCH_IPSC_PORT", default_value_t = 50000)]
    pub ipsc_port: u16,

    #[arg(long, env = "DMRSWITCH_IPSC_NETWORK_ID", default_value_t = 0)]
    pub ipsc_network_id: u32,

    #[arg(long, env = "DMRSWITCH_IPSC_AUTH_ENABLED", default_value_t = true)]
    pub ipsc_auth_enabled: bool,

    #[arg(long, env = "DMRSWITCH_DISABLE_RADIO_ID_VALIDATION", default_value_t = false)]
    pub disable_radio_id_validation: bool,

    #[arg(long, env = "DMRSWITCH_RADIO_ID_URL")]
    pub radio_id_url: Option<String>,

    #[arg(long, env = "DMRSWITCH_REPEATER_ID_URL")]
    pub repeater_id_url: Option<String>,

    #[arg(long, env = "DMRSWITCH_DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "DMRSWITCH_METRICS_LISTEN", default_value = "0.0.0.0:9100")]
    pub metrics_listen: String,
}

impl Config {
    pub fn mmdvm_addr(&self) -> String {
        format!("{}:{}", self.mmdvm_bind, self.mmdvm_port)
    }

    pub fn openbridge_addr(&self) -> String {
        format!("{}:{}", self.openbridge_bind, self.openbridge_port)
    }

    pub fn ipsc_addr(&self) -> String {
        format!("{}:{}", self.ipsc_ip, self.ipsc_port)
    }
}
