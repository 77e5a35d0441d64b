//! Implementation of the `#[pg_function]` attribute macro

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{
    Expr, ExprLit, FnArg, GenericArgument, ItemFn, Lit, Meta, Pat, PatType, PathArguments,
    ReturnType, Token, Type, parse_macro_input,
};

pub fn pg_function_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let options = match parse_attribute(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };

    let sig_info = match parse_function_signature(&input_fn) {
        Ok(info) => info,
        Err(err) => return err.to_compile_error().into(),
    };

    generate_code(&options, &sig_info, &input_fn).into()
}

/// Parsed `#[pg_function(...)]` arguments
struct Options {
    /// Struct identifier, spanned at the name literal
    ident: syn::Ident,
    /// Entry point name as the host sees it
    name: String,
    setof: bool,
}

/// Information extracted from the function signature
struct SignatureInfo {
    fn_name: syn::Ident,
    /// Whether the first parameter is `&Session`
    takes_session: bool,
    /// Parameter names and types, in call order
    params: Vec<(syn::Ident, Box<Type>)>,
    /// Return type with any `Result` wrapper removed
    value_type: Box<Type>,
    is_result: bool,
}

/// Parse the attribute list: `name = "..."` and an optional `setof` flag
fn parse_attribute(attr: TokenStream) -> syn::Result<Options> {
    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse(attr)?;

    let mut name: Option<(syn::Ident, String)> = None;
    let mut setof = false;
    for meta in metas {
        match meta {
            Meta::NameValue(nv) if nv.path.is_ident("name") => {
                let Expr::Lit(ExprLit {
                    lit: Lit::Str(lit), ..
                }) = &nv.value
                else {
                    return Err(syn::Error::new_spanned(
                        &nv.value,
                        "name attribute must be a string literal",
                    ));
                };
                if name.is_some() {
                    return Err(syn::Error::new_spanned(&nv, "duplicate name attribute"));
                }
                let ident = lit.parse::<syn::Ident>().map_err(|_| {
                    syn::Error::new_spanned(lit, "name must be a valid Rust identifier")
                })?;
                name = Some((ident, lit.value()));
            }
            Meta::Path(path) if path.is_ident("setof") => {
                setof = true;
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected `name = \"FunctionName\"` or `setof`",
                ));
            }
        }
    }

    let (ident, name) = name.ok_or_else(|| {
        syn::Error::new(
            Span::call_site(),
            "expected attribute format: #[pg_function(name = \"FunctionName\")]",
        )
    })?;
    Ok(Options { ident, name, setof })
}

/// Check if a type is `Result<T, E>` and extract the Ok type `T`.
fn extract_result_ok_type(ty: &Type) -> Option<Box<Type>> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let last_segment = type_path.path.segments.last()?;
    if last_segment.ident != "Result" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &last_segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(ok_type)) => Some(Box::new(ok_type.clone())),
        _ => None,
    }
}

/// Check if a type is a shared reference to `Session`.
fn is_session_ref(ty: &Type) -> bool {
    let Type::Reference(type_ref) = ty else {
        return false;
    };
    if type_ref.mutability.is_some() {
        return false;
    }
    match &*type_ref.elem {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Session"),
        _ => false,
    }
}

/// Parse the function signature and extract parameter and return types
fn parse_function_signature(func: &ItemFn) -> syn::Result<SignatureInfo> {
    let sig = &func.sig;
    if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "pg_function functions cannot be generic",
        ));
    }
    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "pg_function functions cannot be async",
        ));
    }

    let mut params = Vec::new();
    let mut takes_session = false;
    for (index, input) in sig.inputs.iter().enumerate() {
        match input {
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new_spanned(
                    receiver,
                    "pg_function cannot be applied to methods",
                ));
            }
            FnArg::Typed(PatType { pat, ty, .. }) => {
                let Pat::Ident(pat_ident) = &**pat else {
                    return Err(syn::Error::new_spanned(
                        pat,
                        "pg_function parameters must be plain identifiers",
                    ));
                };
                if index == 0 && is_session_ref(ty) {
                    takes_session = true;
                    continue;
                }
                params.push((pat_ident.ident.clone(), ty.clone()));
            }
        }
    }

    let (value_type, is_result) = match &sig.output {
        ReturnType::Default => (Box::new(syn::parse_quote!(())), false),
        ReturnType::Type(_, ty) => match extract_result_ok_type(ty) {
            Some(ok_type) => (ok_type, true),
            None => (ty.clone(), false),
        },
    };

    Ok(SignatureInfo {
        fn_name: sig.ident.clone(),
        takes_session,
        params,
        value_type,
        is_result,
    })
}

/// Generate the kept function, the entry point struct and its impls
fn generate_code(options: &Options, sig_info: &SignatureInfo, input_fn: &ItemFn) -> TokenStream2 {
    let struct_name = &options.ident;
    let entry_name = &options.name;
    let vis = &input_fn.vis;
    let fn_name = &sig_info.fn_name;
    let arity = sig_info.params.len();

    let param_names: Vec<_> = sig_info.params.iter().map(|(name, _)| name).collect();
    let param_types: Vec<_> = sig_info.params.iter().map(|(_, ty)| ty).collect();

    // Argument decoding: each checks arity and kind against the declared oid.
    let param_extractions = param_names
        .iter()
        .zip(param_types.iter())
        .enumerate()
        .map(|(i, (name, ty))| {
            quote! {
                let #name = __pg_call.arg::<#ty>(__pg_session, #i)?;
            }
        });

    let session_arg = sig_info.takes_session.then(|| quote! { __pg_session, });
    let call_user_fn = if sig_info.is_result {
        quote! {
            let result = #fn_name(#session_arg #( #param_names ),*)
                .map_err(::core::convert::Into::<::pgbridge_core::Error>::into)?;
        }
    } else {
        quote! {
            let result = #fn_name(#session_arg #( #param_names ),*);
        }
    };

    let (finish, return_type) = if options.setof {
        (
            quote! {
                ::pgbridge_core::srf::materialize(__pg_session, __pg_call, result)?;
                Ok(::pgbridge_core::WireValue::NULL)
            },
            quote! { ::pgbridge_core::oids::RECORD },
        )
    } else {
        let value_type = &sig_info.value_type;
        (
            quote! {
                __pg_call.set_result(__pg_session, result)
            },
            quote! { <#value_type as ::pgbridge_core::WireType>::type_oid() },
        )
    };

    let doc = format!("Host entry point `{entry_name}`, calling [`{fn_name}`].");

    quote! {
        #input_fn

        #[doc = #doc]
        #[derive(Clone, Copy, Debug, Default)]
        #vis struct #struct_name;

        impl #struct_name {
            /// Runs the function as a bare `PgFunction`.
            pub fn invoke(
                __pg_session: &::pgbridge_core::Session,
                __pg_call: &mut ::pgbridge_core::CallInfo,
            ) -> ::pgbridge_core::WireValue {
                ::pgbridge_core::guard::outbound(__pg_session, || {
                    let _scope = __pg_session.activate(__pg_call.memory_context());
                    if __pg_call.nargs() != #arity {
                        return Err(::pgbridge_core::Error::ArityOrKindMismatch {
                            detail: ::std::format!(
                                "{} expects {} argument(s), got {}",
                                #entry_name,
                                #arity,
                                __pg_call.nargs()
                            ),
                        });
                    }

                    #( #param_extractions )*

                    #call_user_fn

                    #finish
                })
            }
        }

        impl ::pgbridge_core::EntryPoint for #struct_name {
            fn name(&self) -> &str {
                #entry_name
            }

            fn arg_types(&self) -> ::std::vec::Vec<::pgbridge_core::Oid> {
                ::std::vec![#( <#param_types as ::pgbridge_core::WireType>::type_oid() ),*]
            }

            fn return_type(&self) -> ::pgbridge_core::Oid {
                #return_type
            }

            fn call(
                &self,
                session: &::pgbridge_core::Session,
                call: &mut ::pgbridge_core::CallInfo,
            ) -> ::pgbridge_core::WireValue {
                Self::invoke(session, call)
            }
        }
    }
}
