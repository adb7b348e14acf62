//! Derive macros for the `trellis_system` crate.
//!
//! - `#[derive(Component)]` implements `Component`, optionally declaring
//!   supertypes and generic adapter families.
//! - `#[derive(Injectable)]` implements `Injectable` for a struct whose
//!   fields are its dependencies.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trellis_system::prelude::*;
//!
//! trait Store: Send + Sync {}
//!
//! #[derive(Component, Injectable)]
//! #[component(implements(dyn Store))]
//! struct MemoryStore {
//!     clock: Arc<Clock>,
//!     #[inject(name = "store_label")]
//!     label: Option<Arc<String>>,
//!     #[inject(skip)]
//!     cache: Mutex<Vec<u8>>,
//! }
//! ```

mod crate_path;

use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{Data, DeriveInput, Fields, LitStr, Path, Token, Type, parse_macro_input};

/// Largest parameter tuple `InjectSet` is implemented for.
const MAX_DEPS: usize = 12;

/// Implements `Component`.
///
/// # Attributes
///
/// - `#[component(implements(dyn A, dyn B))]`: also register the value as
///   each listed supertype, nearest first. The type must coerce to each
///   supertype (`Arc<Self>` to `Arc<dyn A>`).
/// - `#[component(bound(Tag))]`: join the generic adapter family `Tag`,
///   which must implement `Binder<Self>`.
///
/// # Generated Code
///
/// ```ignore
/// impl trellis_system::component::Component for MemoryStore {
///     fn lineage(lineage: &mut trellis_system::component::Lineage<Self>) {
///         lineage.implements::<dyn Store>(|this| this);
///     }
/// }
/// ```
#[proc_macro_derive(Component, attributes(component))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ts = crate_path::trellis_system();

    let mut implements: Vec<Type> = Vec::new();
    let mut bounds: Vec<Path> = Vec::new();

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("component")) {
        let parsed = attr.parse_nested_meta(|meta| {
            let content;
            syn::parenthesized!(content in meta.input);
            if meta.path.is_ident("implements") {
                implements.extend(Punctuated::<Type, Token![,]>::parse_terminated(&content)?);
                Ok(())
            } else if meta.path.is_ident("bound") {
                bounds.extend(Punctuated::<Path, Token![,]>::parse_terminated(&content)?);
                Ok(())
            } else {
                Err(meta.error("expected `implements(..)` or `bound(..)`"))
            }
        });
        if let Err(err) = parsed {
            return err.to_compile_error().into();
        }
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = if implements.is_empty() && bounds.is_empty() {
        quote!()
    } else {
        quote! {
            fn lineage(lineage: &mut #ts::component::Lineage<Self>) {
                #(lineage.implements::<#implements>(|this| this);)*
                #(lineage.bound::<#bounds>();)*
            }
        }
    };

    let expanded = quote! {
        impl #impl_generics #ts::component::Component for #name #ty_generics #where_clause {
            #body
        }
    };
    expanded.into()
}

/// Implements `Injectable` from a struct's fields.
///
/// Each field is one dependency and its type must implement `Inject`
/// (`Arc<T>`, `Option<Arc<T>>`, `OrDefault<T>`, `All<T>`, `Components`).
/// Field names become parameter names, so a named component registered
/// under the field's name is preferred over the unnamed one.
///
/// # Attributes
///
/// - `#[inject(name = "other")]`: look the field up under another name.
/// - `#[inject(skip)]`: do not inject; initialize with `Default::default()`.
#[proc_macro_derive(Injectable, attributes(inject))]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ts = crate_path::trellis_system();
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return syn::Error::new_spanned(
                    &input.ident,
                    "Injectable can only be derived for structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(&input.ident, "Injectable can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let mut injected = Vec::new();
    let mut param_names = Vec::new();
    let mut types = Vec::new();
    let mut skipped = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let mut skip = false;
        let mut param_name = LitStr::new(&ident.to_string(), ident.span());

        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("inject")) {
            let parsed = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                    Ok(())
                } else if meta.path.is_ident("name") {
                    param_name = meta.value()?.parse()?;
                    Ok(())
                } else {
                    Err(meta.error("expected `skip` or `name = \"..\"`"))
                }
            });
            if let Err(err) = parsed {
                return err.to_compile_error().into();
            }
        }

        if skip {
            skipped.push(ident);
        } else {
            injected.push(ident);
            param_names.push(param_name);
            types.push(field.ty.clone());
        }
    }

    if injected.len() > MAX_DEPS {
        return syn::Error::new_spanned(
            &input.ident,
            format!("Injectable supports at most {MAX_DEPS} injected fields"),
        )
        .to_compile_error()
        .into();
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let construct = if matches!(&input.data, Data::Struct(data) if matches!(data.fields, Fields::Unit))
    {
        quote!(Self)
    } else {
        quote!(Self { #(#injected,)* #(#skipped: ::core::default::Default::default(),)* })
    };

    let expanded = quote! {
        impl #impl_generics #ts::adapter::Injectable for #name #ty_generics #where_clause {
            type Deps = (#(#types,)*);

            const PARAM_NAMES: &'static [&'static str] = &[#(#param_names),*];

            fn inject(deps: Self::Deps) -> Self {
                let (#(#injected,)*) = deps;
                #construct
            }
        }
    };
    expanded.into()
}
