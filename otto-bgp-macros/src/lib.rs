//! Derive macro for small newtype config wrappers that need a named-constant
//! default and transparent conversion to/from their inner value.
//!
//! Used throughout configuration snapshots for scalar values (timeouts,
//! thresholds, worker counts) so each field carries its own documented
//! default instead of scattering `Default::default()` fallbacks across the
//! merge logic.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// ```ignore
/// const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
///
/// #[derive(WrapperWithDefault)]
/// #[wrapper_default_value(DEFAULT_TIMEOUT)]
/// struct SshTimeout(Duration);
/// ```
///
/// Generates `Default`, `From<Inner> for Wrapper`, and `From<Wrapper> for
/// Inner` so the wrapper behaves like its inner type everywhere except at
/// the one call site that cares about its documented default.
#[proc_macro_derive(WrapperWithDefault, attributes(wrapper_default_value))]
pub fn derive_wrapper_with_default(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = &input.ident;

    let inner_ty = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Unnamed(fields) if fields.unnamed.len() == 1 => {
                fields.unnamed.first().unwrap().ty.clone()
            }
            _ => {
                return syn::Error::new_spanned(
                    &input.ident,
                    "WrapperWithDefault requires a single-field tuple struct",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(
                &input.ident,
                "WrapperWithDefault can only be derived for structs",
            )
            .to_compile_error()
            .into();
        }
    };

    let default_value = input
        .attrs
        .iter()
        .find(|attr| attr.path().is_ident("wrapper_default_value"))
        .map(|attr| attr.parse_args::<syn::Expr>())
        .transpose();

    let default_value = match default_value {
        Ok(Some(expr)) => expr,
        Ok(None) => {
            return syn::Error::new_spanned(
                &input.ident,
                "missing #[wrapper_default_value(...)] attribute",
            )
            .to_compile_error()
            .into();
        }
        Err(err) => return err.to_compile_error().into(),
    };

    let expanded = quote! {
        impl Default for #ident {
            fn default() -> Self {
                Self(#default_value)
            }
        }

        impl From<#inner_ty> for #ident {
            fn from(value: #inner_ty) -> Self {
                Self(value)
            }
        }

        impl From<#ident> for #inner_ty {
            fn from(wrapper: #ident) -> Self {
                wrapper.0
            }
        }
    };

    expanded.into()
}
