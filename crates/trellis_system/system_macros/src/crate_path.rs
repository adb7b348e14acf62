//! Locates `trellis_system` from the consuming crate.
//!
//! Derive output names `Component`, `Lineage` and `Injectable` by absolute
//! path. The path depends on how the consumer depends on Trellis: directly
//! (possibly renamed), through the `trellis` umbrella, or not at all when
//! the consumer is `trellis_system` itself.

use proc_macro_crate::{FoundCrate, crate_name};
use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::Ident;

fn ident(name: &str) -> Ident {
    Ident::new(name, Span::call_site())
}

/// Returns the token path for `trellis_system` in the consuming crate.
pub(crate) fn trellis_system() -> TokenStream {
    if let Ok(found) = crate_name("trellis_system") {
        // `trellis_system` declares `extern crate self as trellis_system`.
        let name = match found {
            FoundCrate::Itself => ident("trellis_system"),
            FoundCrate::Name(name) => ident(&name),
        };
        return quote!(::#name);
    }
    match crate_name("trellis") {
        Ok(FoundCrate::Name(umbrella)) => {
            let umbrella = ident(&umbrella);
            quote!(::#umbrella::trellis_system)
        }
        _ => quote!(::trellis_system),
    }
}
