use super::{Emitter, GatewayResources, report_gce_settings, report_ingress_nginx_policies};
use crate::{err::I2GResult, ir::Ir, notifications::Notifications};

const NAME: &str = "standard";

/// Plain Gateway API, nothing implementation specific.
pub struct StandardEmitter;

impl Emitter for StandardEmitter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn emit(&self, ir: Ir, notes: &mut Notifications) -> I2GResult<GatewayResources> {
        report_ingress_nginx_policies(&ir, NAME, notes);
        report_gce_settings(&ir, NAME, notes);
        Ok(GatewayResources::from_ir(&ir))
    }
}
