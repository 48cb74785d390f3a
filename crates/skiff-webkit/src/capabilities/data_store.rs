//! Website data store capability.
//!
//! Captured from a configuration like the user content controller. Data
//! removal and cookie installation are asynchronous on the native side, so
//! both ride the responder into the platform completion.

use std::any::Any;
use std::rc::Rc;

use serde_json::{json, Value};
use skiff_core::channel::{f64_arg, id_arg, typed_arg};
use skiff_core::{BridgeContext, Capability, Responder};

use crate::capabilities::unknown_method;
use crate::platform::{WebViewConfiguration, WebsiteDataStore};
use crate::types::{HttpCookie, WebsiteDataType};

/// Channel name for website data store traffic.
pub const CHANNEL: &str = "website_data_store";

/// Inbound adapter for website data store operations.
pub struct WebsiteDataStoreCapability;

impl WebsiteDataStoreCapability {
    fn create_from_configuration(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let configuration = ctx.resolve::<WebViewConfiguration>(id_arg(args, 1)?)?;
        let any: Rc<dyn Any> = configuration.website_data_store();
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }
}

impl Capability for WebsiteDataStoreCapability {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn invoke(&self, ctx: &Rc<BridgeContext>, method: &str, args: &[Value], responder: Responder) {
        match method {
            "create_from_configuration" => responder(self.create_from_configuration(ctx, args)),
            "remove_data_of_types" => {
                let resolved = id_arg(args, 0).and_then(|id| {
                    Ok((
                        ctx.resolve::<WebsiteDataStore>(id)?,
                        typed_arg::<Vec<WebsiteDataType>>(args, 1)?,
                        f64_arg(args, 2)?,
                    ))
                });
                match resolved {
                    Ok((store, types, modified_since)) => {
                        // Replies with whether any matching records existed.
                        store.remove_data_of_types(
                            &types,
                            modified_since,
                            Box::new(move |had_records| responder(Ok(json!(had_records)))),
                        );
                    }
                    Err(e) => responder(Err(e)),
                }
            }
            "set_cookie" => {
                let resolved = id_arg(args, 0).and_then(|id| {
                    Ok((
                        ctx.resolve::<WebsiteDataStore>(id)?,
                        typed_arg::<HttpCookie>(args, 1)?,
                    ))
                });
                match resolved {
                    Ok((store, cookie)) => {
                        store.set_cookie(&cookie, Box::new(move || responder(Ok(Value::Null))));
                    }
                    Err(e) => responder(Err(e)),
                }
            }
            _ => responder(Err(unknown_method(CHANNEL, method))),
        }
    }
}
